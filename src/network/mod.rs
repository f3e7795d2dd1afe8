//! UDP transport for the data and control channels

pub mod udp;

pub use udp::{create_socket, ChannelStats, UdpChannel};
