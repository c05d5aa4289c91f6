//! Capture and viewer endpoints for panelcast.
//!
//! Both roles share the same pieces: a [`DirectoryClient`] connection to
//! the broker, a [`SessionTable`] of panel negotiations and a
//! [`PeerTransport`] that builds the actual peer connections. The
//! [`CaptureEndpoint`] offers panels; the [`ViewerEndpoint`] requests and
//! answers them.

pub mod capture;
pub mod control;
pub mod directory;
pub mod endpoint;
pub mod media;
pub mod providers;
pub mod session;
pub mod transport;
pub mod viewer;

pub use capture::{CaptureCommand, CaptureEndpoint, CaptureProviders, PanelBinding};
pub use control::{InputEvent, InputKind};
pub use directory::{DirectoryClient, DirectoryEvent, Signal};
pub use endpoint::EndpointEvent;
pub use media::MediaPolicy;
pub use providers::{
    CaptureProvider, InputInjector, MediaStream, StaticWindows, WindowInfo, WindowProvider,
};
pub use session::{CloseReason, SessionInfo, SessionKey, SessionState, SessionTable};
pub use transport::{
    ConnectionState, MemoryNetwork, MemoryTransport, PeerConnection, PeerTransport,
    SessionDescription,
};
pub use viewer::{ViewerCommand, ViewerEndpoint};
