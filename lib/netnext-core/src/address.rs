//! Endpoint addresses as a tagged union of none/IPv4/IPv6, matching the session tables' use of a
//! `NONE` address tag as the tombstone marker (§3.4, §4.5).
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Wire/tombstone tag. `None` is the sentinel a session table slot carries once freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    None,
    V4(Ipv4Addr, u16),
    V6(Ipv6Addr, u16),
}

impl Address {
    const TAG_NONE: u8 = 0;
    const TAG_V4: u8 = 1;
    const TAG_V6: u8 = 2;

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Address::None)
    }

    /// Destination address bytes with the host part zeroed. Used by the advanced filter when
    /// validating upgrade-request packets, which arrive before the client knows its own
    /// externally observed address (§4.1).
    #[inline]
    pub fn zeroed_like(&self) -> Address {
        match self {
            Address::None => Address::None,
            Address::V4(_, _) => Address::V4(Ipv4Addr::UNSPECIFIED, 0),
            Address::V6(_, _) => Address::V6(Ipv6Addr::UNSPECIFIED, 0),
        }
    }

    pub fn write<W: Write>(&self, mut stream: W) -> io::Result<()> {
        match self {
            Address::None => stream.write_u8(Self::TAG_NONE),
            Address::V4(ip, port) => {
                stream.write_u8(Self::TAG_V4)?;
                stream.write_all(&ip.octets())?;
                stream.write_u16::<BigEndian>(*port)
            }
            Address::V6(ip, port) => {
                stream.write_u8(Self::TAG_V6)?;
                stream.write_all(&ip.octets())?;
                stream.write_u16::<BigEndian>(*port)
            }
        }
    }

    pub fn read<R: Read>(mut stream: R) -> io::Result<Address> {
        match stream.read_u8()? {
            Self::TAG_NONE => Ok(Address::None),
            Self::TAG_V4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets)?;
                let port = stream.read_u16::<BigEndian>()?;
                Ok(Address::V4(Ipv4Addr::from(octets), port))
            }
            Self::TAG_V6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets)?;
                let port = stream.read_u16::<BigEndian>()?;
                Ok(Address::V6(Ipv6Addr::from(octets), port))
            }
            _ => Err(io::ErrorKind::InvalidData.into()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) => Address::V4(ip, addr.port()),
            IpAddr::V6(ip) => Address::V6(ip, addr.port()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::None => write!(f, "none"),
            Address::V4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::V6(ip, port) => write!(f, "[{}]:{}", ip, port),
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::None
    }
}
