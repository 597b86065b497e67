mod assets;
mod client;
mod error;
mod provisioner;
mod types;

pub use assets::AssetStore;
pub use client::HttpFetcher;
pub use error::ProvisionError;
pub use provisioner::ArtifactProvisioner;
pub use types::*;
