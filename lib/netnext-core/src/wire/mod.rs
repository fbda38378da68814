//! Wire-level building blocks: the two-stage packet filter (§4.1), the packet type id space
//! (§6.2), the fixed-size AEAD header codec (§4.2), and the three sealed token formats (§6.3).
pub mod dispatch;
pub mod filter;
pub mod header;
pub mod packet_type;
pub mod tokens;
