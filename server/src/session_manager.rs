//! Login session tracking for the mock RCON server
//!
//! This module handles the server-side bookkeeping of logged-in RCON clients:
//! - Session lifecycle (login, replacement on re-login, idle timeout)
//! - Per-session sequence numbers for server-pushed messages
//! - Capacity enforcement and address lookup
//!
//! A datagram is only accepted from an address that holds a session, with
//! the exception of login packets, which create one.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One logged-in RCON client
#[derive(Debug)]
pub struct Session {
    /// Identifier assigned at login
    pub id: u32,
    /// Address responses and server messages are sent to
    pub addr: SocketAddr,
    /// Last time any packet arrived from this client
    pub last_seen: Instant,
    /// Sequence of the next server message pushed to this client
    pub push_sequence: u8,
    /// Server messages the client has acknowledged
    pub acked: u64,
}

impl Session {
    /// Creates a session for a client that just logged in.
    ///
    /// The session starts out active, with server-message sequence zero and
    /// nothing acknowledged.
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            push_sequence: 0,
            acked: 0,
        }
    }

    /// Marks the client as active.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns the sequence for the next server message and advances it.
    ///
    /// The sequence is a single byte on the wire and wraps after 255.
    pub fn next_push_sequence(&mut self) -> u8 {
        let seq = self.push_sequence;
        self.push_sequence = self.push_sequence.wrapping_add(1);
        seq
    }

    /// Returns true if nothing has been heard from the client for `timeout`.
    ///
    /// BattlEye servers drop sessions that stay silent for 45 seconds, which
    /// is why clients send keep-alives.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages every logged-in session
///
/// The SessionManager enforces the server's capacity and idle timeout and
/// maps source addresses back to sessions, since UDP gives the server
/// nothing else to identify a client by.
#[derive(Debug)]
pub struct SessionManager {
    /// Sessions indexed by their id
    sessions: HashMap<u32, Session>,
    /// Next id handed out at login
    next_session_id: u32,
    /// Maximum number of concurrent sessions
    max_sessions: usize,
    /// Idle time after which a session is dropped
    timeout: Duration,
}

impl SessionManager {
    /// Creates an empty manager.
    ///
    /// Session ids start from 1 and increase with every login.
    pub fn new(max_sessions: usize, timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            max_sessions,
            timeout,
        }
    }

    /// Attempts to open a session for `addr`
    ///
    /// Returns Some(session_id) on success and None if the server is full.
    /// Callers remove any previous session of the same address first.
    pub fn add_session(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        info!("Session {} logged in from {}", session_id, addr);
        self.sessions.insert(session_id, Session::new(session_id, addr));

        Some(session_id)
    }

    /// Removes a session. Returns false if it was already gone.
    pub fn remove_session(&mut self, session_id: &u32) -> bool {
        if let Some(session) = self.sessions.remove(session_id) {
            info!("Session {} ended", session.id);
            true
        } else {
            false
        }
    }

    /// Finds the session owning `addr`.
    pub fn find_session_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.sessions
            .iter()
            .find(|(_, session)| session.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get_mut(&mut self, session_id: &u32) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// Marks the session owning `addr` as active.
    ///
    /// Returns false if `addr` is not logged in.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.sessions.values_mut().find(|s| s.addr == addr) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Records an acknowledged server message for the session owning `addr`.
    pub fn record_ack(&mut self, addr: SocketAddr) -> bool {
        match self.sessions.values_mut().find(|s| s.addr == addr) {
            Some(session) => {
                session.touch();
                session.acked += 1;
                true
            }
            None => false,
        }
    }

    /// Checks for and removes idle sessions
    ///
    /// Returns the ids that were removed.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timeout = self.timeout;
        let timed_out: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for session_id in &timed_out {
            self.remove_session(session_id);
        }

        timed_out
    }

    /// Allocates a server-message sequence for every session.
    ///
    /// Used when broadcasting: each client sees its own gap-free sequence.
    pub fn push_targets(&mut self) -> Vec<(SocketAddr, u8)> {
        self.sessions
            .values_mut()
            .map(|session| (session.addr, session.next_push_sequence()))
            .collect()
    }

    /// Returns every session id with its address.
    pub fn session_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, session.addr))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
