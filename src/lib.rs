//! # Stagehand
//!
//! Pushes a rendered file to a fleet of hosts and runs an action against it.
//!
//! ## Usage
//!
//! ```bash
//! stagehand --targets hosts.yml --template guest.xml.j2 --vars memory=2048 --action virt_define
//! ```
//!
//! ## Modules
//!
//! - `render` - Template rendering with per-target variables
//! - `transport` - Remote file transfer and command execution (SSH, mock)
//! - `stager` - Render, transfer and permission repair for one target
//! - `executor` - Runs the remote action against a staged file
//! - `dispatch` - Bounded concurrent fan-out with retry and a deadline
//! - `config` - Settings file, inventory and argument parsing
//! - `subprocess` - Process execution abstraction for testing
pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod render;
pub mod stager;
pub mod subprocess;
pub mod target;
pub mod transport;

pub use dispatch::{DispatchConfig, DispatchJob, DispatchReport, Dispatcher, RetryPolicy};
pub use error::{Error, ErrorKind, Result};
pub use executor::{ActionExecutor, ActionRequest, ActionResult};
pub use render::{RenderRequest, Renderer, TeraRenderer, VariableBag};
pub use stager::{PayloadStager, RepairPolicy, StagedPayload};
pub use target::{AuthContext, Escalation, Target};
pub use transport::{MockTransport, SshTransport, Transport};
