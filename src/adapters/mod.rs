//! Concrete collaborators behind the domain ports
//!
//! - [`flasharray`]: FlashArray REST 1.x client ([`ArrayClient`](crate::domain::ports::ArrayClient))
//! - [`hdbsql`]: SAP `hdbsql` command line client ([`DatabaseControl`](crate::domain::ports::DatabaseControl))
//! - [`ssh`]: russh sessions ([`RemoteExecutor`](crate::domain::ports::RemoteExecutor))
//! - [`vsphere`]: vCenter lookups ([`VCenterLookup`](crate::domain::ports::VCenterLookup))
//! - [`prompt`]: terminal dialogs ([`OperatorPrompt`](crate::domain::ports::OperatorPrompt))

pub mod flasharray;
pub mod hdbsql;
pub mod prompt;
pub mod ssh;
pub mod vsphere;

pub use flasharray::{FlashArrayClient, FlashArrayConfig};
pub use hdbsql::{HdbsqlClient, HdbsqlConfig};
pub use prompt::TerminalPrompt;
pub use ssh::{SshExecutor, SshSettings};
pub use vsphere::{VSphereClient, VSphereConfig};
