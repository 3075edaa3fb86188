use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// The datagram transport under [super::KrpcSocket].
pub trait Udp: Debug + Send + Sync {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

pub mod real {
    use super::*;

    #[derive(Debug)]
    pub struct UdpSocket(pub(crate) std::net::UdpSocket);

    impl UdpSocket {
        pub fn bind(addr: SocketAddr) -> io::Result<Box<Self>> {
            Ok(Box::new(Self(std::net::UdpSocket::bind(addr)?)))
        }
    }

    impl Udp for UdpSocket {
        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.0.recv_from(buf)
        }
        fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
            self.0.send_to(buf, addr)
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.0.local_addr()
        }
        fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
            self.0.set_read_timeout(dur)
        }
        fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
            self.0.set_write_timeout(dur)
        }
    }
}
