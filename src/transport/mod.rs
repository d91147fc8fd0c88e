pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use rfcomm::{RfcommConfig, RfcommTransport};
pub use tcp::{TcpSimConfig, TcpSimTransport};
pub use traits::{ClientSocket, LinkListener, LinkStream, Transport};
