//! Types shared by the panelcast broker and its clients: the signaling wire
//! protocol, peer identifiers, media enums and the error taxonomy.

pub mod errors;
pub mod id;
pub mod media;
pub mod protocol;

pub use errors::{ConfigError, PanelcastError, ProviderError, TransportError};
pub use id::{new_id, PeerId};
pub use media::{StreamPriority, VideoCodec};
pub use protocol::{CatalogueSnapshot, ClientMessage, PeerInfo, Role, ServerMessage};

pub type Result<T> = std::result::Result<T, PanelcastError>;
