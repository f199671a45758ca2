pub mod directory;
pub mod net;
pub mod presence;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod socketio;
pub mod timeline;
pub mod types;
pub mod typing;
