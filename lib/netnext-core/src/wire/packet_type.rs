//! Fixed packet type ids (§6.2). All data/control/backend plane types share one id space under
//! 256 so the header's leading type byte can select a parser with a single match.

macro_rules! packet_types {
    ($($name:ident = $value:expr),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum PacketType {
            $($name = $value),*
        }

        impl PacketType {
            pub fn from_u8(value: u8) -> Option<PacketType> {
                match value {
                    $($value => Some(PacketType::$name),)*
                    _ => None,
                }
            }
        }
    };
}

packet_types! {
    // Data plane
    Direct = 0,
    ClientToServer = 1,
    ServerToClient = 2,
    SessionPing = 3,
    SessionPong = 4,
    ClientPing = 5,
    ClientPong = 6,
    ServerPing = 7,
    ServerPong = 8,
    Passthrough = 9,

    // Control plane
    UpgradeRequest = 10,
    UpgradeResponse = 11,
    UpgradeConfirm = 12,
    DirectPing = 13,
    DirectPong = 14,
    RouteRequest = 15,
    RouteResponse = 16,
    ContinueRequest = 17,
    ContinueResponse = 18,
    ClientStats = 19,
    RouteUpdate = 20,
    RouteUpdateAck = 21,
    ClientRelayUpdate = 22,
    ClientRelayAck = 23,

    // Backend plane
    BackendServerInitRequest = 24,
    BackendServerInitResponse = 25,
    BackendServerUpdateRequest = 26,
    BackendServerUpdateResponse = 27,
    BackendSessionUpdateRequest = 28,
    BackendSessionUpdateResponse = 29,
    BackendClientRelayRequest = 30,
    BackendClientRelayResponse = 31,
    BackendServerRelayRequest = 32,
    BackendServerRelayResponse = 33,
}

impl PacketType {
    /// Types that are Ed25519-signed rather than (or in addition to) AEAD-sealed (§6.2).
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PacketType::UpgradeRequest
                | PacketType::UpgradeConfirm
                | PacketType::BackendServerInitRequest
                | PacketType::BackendServerInitResponse
                | PacketType::BackendServerUpdateRequest
                | PacketType::BackendServerUpdateResponse
                | PacketType::BackendSessionUpdateRequest
                | PacketType::BackendSessionUpdateResponse
                | PacketType::BackendClientRelayRequest
                | PacketType::BackendClientRelayResponse
                | PacketType::BackendServerRelayRequest
                | PacketType::BackendServerRelayResponse
        )
    }

    /// Types that cross the route envelope AEAD (header + optional body) rather than riding bare.
    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            PacketType::DirectPing
                | PacketType::DirectPong
                | PacketType::ClientStats
                | PacketType::RouteUpdate
                | PacketType::RouteUpdateAck
                | PacketType::ClientRelayUpdate
                | PacketType::ClientRelayAck
                | PacketType::SessionPing
                | PacketType::SessionPong
                | PacketType::ClientToServer
                | PacketType::ServerToClient
        )
    }
}
