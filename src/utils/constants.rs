pub const SOCKS4_VERSION: u8 = 0x04;
pub const SOCKS5_VERSION: u8 = 0x05;

pub const CMD_CONNECT: u8 = 0x01;

// Username/password sub-negotiation.
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;
pub const SOCKS5_AUTH_SUCCEEDED: u8 = 0x00;
pub const SOCKS5_AUTH_FAILED: u8 = 0x01;

// SOCKS4 replies carry a null version byte.
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;
pub const SOCKS4_GRANTED: u8 = 0x5A;
pub const SOCKS4_REJECTED: u8 = 0x5B;
pub const SOCKS4_MAX_USER_ID: usize = 255;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;
