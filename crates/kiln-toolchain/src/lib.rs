//! Kiln Toolchain: runtime selection for the build pipeline
//!
//! Pins the language runtime used for both compilation and test execution.
//! Provisioning is a seam ([`ToolchainProvisioner`]); [`HostProvisioner`]
//! searches the local machine.

pub mod provision;
pub mod selector;
pub mod toolchain;

pub use provision::{HostProvisioner, ToolchainProvisioner, TOOLCHAIN_ENV_PREFIX};
pub use selector::ToolchainSelector;
pub use toolchain::Toolchain;
