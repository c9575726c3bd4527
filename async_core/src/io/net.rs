// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! TCP listener/stream wrappers over [`super::IoEngine`]'s socket ops.
//!
//! Grounded on `original_source/lib/reactor/io/socket.hh`/`.cc`'s
//! `Socket`/`Client`/`Server` trio. Renamed to the `std::net` names
//! (`TcpStream`/`TcpListener`) callers already know; the underlying
//! `Socket` handle and its move-only, fatal-if-unclosed-on-drop
//! discipline are unchanged.

use std::net::Ipv4Addr;

use crate::error::Result;
use crate::io::{check, IoEngine};

const INVALID_FD: i32 = -1;
const BACKLOG: i32 = 128;

/// A raw socket file descriptor with the same move-only,
/// fatal-on-unclosed-drop discipline as [`super::file::File`].
pub struct Socket {
    fd: i32,
}

impl Socket {
    fn new(fd: i32) -> Self {
        Socket { fd }
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.fd
    }

    pub async fn close(mut self) -> Result<()> {
        let fd = self.fd;
        self.fd = INVALID_FD;
        let ret = IoEngine::current().close(fd).await?;
        check("close", ret)?;
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.fd != INVALID_FD {
            panic!("Socket dropped without being closed");
        }
    }
}

fn sockaddr_in(port: u16, addr: Ipv4Addr) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.octets()),
        },
        sin_zero: [0; 8],
    }
}

async fn open_tcp_socket() -> Result<i32> {
    let sock = IoEngine::current().socket(libc::AF_INET, libc::SOCK_STREAM, 0).await?;
    check("socket", sock)
}

/// A bound, listening TCP socket.
pub struct TcpListener {
    socket: Socket,
}

impl TcpListener {
    /// Bind and listen on `0.0.0.0:port`.
    pub async fn bind(port: u16) -> Result<TcpListener> {
        let fd = open_tcp_socket().await?;

        let optval: i32 = 1;
        let ret = IoEngine::current()
            .setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &optval.to_ne_bytes())
            .await?;
        check("setsockopt(SO_REUSEADDR)", ret)?;

        let addr = sockaddr_in(port, Ipv4Addr::UNSPECIFIED);
        // Safety: `addr` lives on this async fn's stack for the whole
        // `bind` call below, which is synchronous (a posix_call-style
        // shim, not submitted to the ring) and does not outlive it.
        let ret = unsafe {
            IoEngine::current().bind(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as u32,
            )
        }
        .await?;
        check("bind", ret)?;

        let ret = IoEngine::current().listen(fd, BACKLOG).await?;
        check("listen", ret)?;

        Ok(TcpListener {
            socket: Socket::new(fd),
        })
    }

    /// Accept one incoming connection.
    pub async fn accept(&self) -> Result<TcpStream> {
        // Safety: no address is requested back (both pointers null), so
        // there is nothing for the kernel to write into past this call.
        let sock = unsafe {
            IoEngine::current().accept(self.socket.as_raw_fd(), std::ptr::null_mut(), std::ptr::null_mut())
        }
        .await?;
        let fd = check("accept", sock)?;
        Ok(TcpStream {
            socket: Socket::new(fd),
        })
    }

    pub async fn close(self) -> Result<()> {
        self.socket.close().await
    }
}

/// A connected TCP stream.
pub struct TcpStream {
    socket: Socket,
}

impl TcpStream {
    /// Connect to `addr:port`.
    pub async fn connect(addr: Ipv4Addr, port: u16) -> Result<TcpStream> {
        let fd = open_tcp_socket().await?;
        let sockaddr = sockaddr_in(port, addr);
        // Safety: `sockaddr` lives on this async fn's stack across the
        // `.await` below, pinned as part of the generated future.
        let ret = unsafe {
            IoEngine::current().connect(
                fd,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as u32,
            )
        }
        .await?;
        check("connect", ret)?;
        Ok(TcpStream {
            socket: Socket::new(fd),
        })
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<u64> {
        // Safety: `buf` outlives the await; see `File::read`.
        let result = unsafe { IoEngine::current().recv(self.socket.as_raw_fd(), buf, 0).await? };
        Ok(check("recv", result)? as u64)
    }

    pub async fn write(&self, buf: &[u8]) -> Result<u64> {
        // Safety: see `read`.
        let result = unsafe { IoEngine::current().send(self.socket.as_raw_fd(), buf, 0).await? };
        Ok(check("send", result)? as u64)
    }

    pub async fn close(self) -> Result<()> {
        self.socket.close().await
    }
}
