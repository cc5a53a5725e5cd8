pub mod destroy;
pub mod outputs;
pub mod plan;
pub mod refresh;
pub mod stacks;
pub mod state;
pub mod up;
pub mod validate;
