//! Pluggable front ends and back ends.
//!
//! A front end (interface) produces requests and consumes results; a back
//! end (model) does the opposite. Neither talks to the other directly: the
//! controller hands each one end of its own duplex channel through
//! `set_streams` and relays between them.
//!
//! ## Connect sequence
//!
//! ```text
//! Controller                 Back end                     Front end
//!     |-- verify_controller_compatibility ->|                 |
//!     |<------------- (ok, message) --------|                 |
//!     |-- capabilities() ------------------------------------>|
//!     |<------------- requirements ---------------------------|
//!     |-- capabilities() ------------------>|                 |
//!     |   negotiate                          |                 |
//!     |-- check_compatibility ------------->|                 |
//!     |-- set_streams --------------------->|                 |
//!     |-- set_streams --------------------------------------->|
//! ```

mod echo;
mod registry;
mod stdio;

pub use echo::EchoModel;
pub use registry::{BackEndFactory, FrontEndFactory, ModuleRegistry};
pub use stdio::StdioInterface;

use async_trait::async_trait;

use crate::protocol::{CapabilityRequirements, CapabilitySupport};
use crate::transport::{BoxedReader, BoxedWriter};

/// The requesting side of a session
#[async_trait]
pub trait FrontEnd: Send {
    /// Stable identifier (registry key)
    fn id(&self) -> &str;

    /// What this front end needs. `None` means no constraints.
    async fn capabilities(&mut self) -> Option<CapabilityRequirements>;

    /// Receive this module's end of the front channel.
    ///
    /// `reader` yields what the back end sent; bytes written to `writer`
    /// go to the back end. Shutting down `writer` ends the session.
    fn set_streams(&mut self, reader: BoxedReader, writer: BoxedWriter);

    /// Release resources. Called once during session close.
    async fn close(&mut self) {}
}

/// The answering side of a session
#[async_trait]
pub trait BackEnd: Send {
    /// Stable identifier (registry key)
    fn id(&self) -> &str;

    /// Capabilities this back end supports
    fn capabilities(&self) -> CapabilitySupport;

    /// Accept or refuse the controller's version before anything else
    async fn verify_controller_compatibility(&mut self, controller_version: &str) -> (bool, String);

    /// Final say on the front end's requirements after negotiation
    async fn check_compatibility(&mut self, requirements: &CapabilityRequirements) -> (bool, String);

    /// Receive this module's end of the back channel
    fn set_streams(&mut self, reader: BoxedReader, writer: BoxedWriter);

    /// Release resources. Called once during session close.
    async fn close(&mut self) {}
}
