pub mod assets;
pub mod codec;
pub mod compositor;
pub mod config;
pub mod error_codes;
pub mod logging;
pub mod palette;
pub mod selection;
pub mod shaders;
pub mod texture_stage;
