pub mod bundle_loader;
pub mod toml_loader;

pub use bundle_loader::{load_all_bundles, load_bundle_dir};
pub use toml_loader::load_assessment;
