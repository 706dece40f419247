//! Datagram transport over the socketpair shared with the parent
//!
//! Control messages are single datagrams on a `SOCK_SEQPACKET` socket.
//! Replies may carry one file descriptor as `SCM_RIGHTS` ancillary data.

use crate::errors::ProxyError;
use nix::sys::socket::{self, ControlMessage, MsgFlags};
use std::{
    io::{IoSlice, IoSliceMut},
    os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
};

/// One result of reading from the control socket
pub enum Packet {
    /// A complete datagram of this length is in the caller's buffer
    Data(usize),
    /// The peer sent a datagram larger than the caller's buffer; it was
    /// consumed and dropped
    Oversized,
    /// The peer closed the socket
    Eof,
}

/// The pre-connected control socket inherited from the parent process
pub struct ProxySocket {
    fd: OwnedFd,
}

impl ProxySocket {
    /// Adopt the socket fd number handed to us at startup
    ///
    /// # Safety
    /// `fd` must be an open socket that nothing else in this process owns.
    pub unsafe fn from_raw_fd(fd: RawFd) -> ProxySocket {
        ProxySocket {
            fd: OwnedFd::from_raw_fd(fd),
        }
    }

    pub fn from_fd(fd: OwnedFd) -> ProxySocket {
        ProxySocket { fd }
    }

    /// Read exactly one datagram into `buf`
    ///
    /// The caller sizes `buf` at the protocol's packet limit, so truncation
    /// only happens for packets the protocol forbids.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Packet, ProxyError> {
        loop {
            let mut iov = [IoSliceMut::new(buf)];
            match socket::recvmsg::<socket::UnixAddr>(
                self.fd.as_raw_fd(),
                &mut iov,
                None,
                MsgFlags::empty(),
            ) {
                Ok(msg) if msg.flags.contains(MsgFlags::MSG_TRUNC) => return Ok(Packet::Oversized),
                Ok(msg) if msg.bytes == 0 => return Ok(Packet::Eof),
                Ok(msg) => return Ok(Packet::Data(msg.bytes)),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => return Err(ProxyError::Os(err)),
            }
        }
    }

    /// Write one datagram, optionally passing a file descriptor
    ///
    /// The kernel duplicates a passed fd into the peer at send time; the
    /// caller still owns (and must close) its local copy.
    pub fn send(&self, payload: &[u8], fd: Option<BorrowedFd>) -> Result<(), ProxyError> {
        let iov = [IoSlice::new(payload)];
        let fds: Vec<RawFd> = fd.iter().map(|fd| fd.as_raw_fd()).collect();
        let cmsgs: Vec<ControlMessage> = if fds.is_empty() {
            vec![]
        } else {
            vec![ControlMessage::ScmRights(&fds)]
        };
        let sent = loop {
            match socket::sendmsg::<()>(
                self.fd.as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::empty(),
                None,
            ) {
                Ok(sent) => break sent,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => return Err(ProxyError::Os(err)),
            }
        };
        // The ancillary block is all-or-nothing in the kernel; checking the
        // byte count is enough to know the whole reply went out.
        if sent != payload.len() {
            return Err(ProxyError::ShortWrite);
        }
        Ok(())
    }
}
