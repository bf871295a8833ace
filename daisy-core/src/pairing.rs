//! Pairing gate: short-lived codes in, single-use session tokens out.
//!
//! ```text
//!  issue_code ──► authorize(code, device) ──► token ──► redeem(token) ──► ClientId
//!                      │ single use                          │ single use
//!                      ▼                                     ▼
//!               Denied(reason)                       Denied(InvalidToken)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PairingConfig;
use crate::error::{DaisyError, DenyReason};
use crate::model::{ClientId, ClientInfo, PairingRequest, PairingResponse};

#[derive(Default)]
struct GateState {
    /// Outstanding codes and their expiry.
    codes: HashMap<String, Instant>,
    /// Codes already redeemed, with the instant they would have expired.
    used: HashMap<String, Instant>,
    /// Unredeemed tokens and their expiry.
    tokens: HashMap<String, (ClientId, Instant)>,
    clients: HashMap<ClientId, ClientInfo>,
}

/// Authorizes devices and tracks paired clients.
pub struct PairingGate {
    config: PairingConfig,
    state: Mutex<GateState>,
}

impl PairingGate {
    pub fn new(config: PairingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Generate a fresh six-digit code.
    pub fn issue_code(&self) -> String {
        self.issue_code_at(Instant::now())
    }

    pub fn issue_code_at(&self, now: Instant) -> String {
        let mut state = self.state.lock();
        let code = loop {
            let candidate = format!("{:06}", Uuid::new_v4().as_u128() % 1_000_000);
            if !state.codes.contains_key(&candidate) && !state.used.contains_key(&candidate) {
                break candidate;
            }
        };
        state.codes.insert(code.clone(), now + self.config.code_ttl);
        debug!(ttl = ?self.config.code_ttl, "pairing code issued");
        code
    }

    /// Accept a host-chosen code (e.g. from the command line).
    pub fn register_code(&self, code: impl Into<String>) -> Result<(), DaisyError> {
        self.register_code_at(code, Instant::now())
    }

    pub fn register_code_at(&self, code: impl Into<String>, now: Instant) -> Result<(), DaisyError> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DaisyError::Denied(DenyReason::MalformedRequest));
        }
        let mut state = self.state.lock();
        state.used.remove(&code);
        state.codes.insert(code, now + self.config.code_ttl);
        Ok(())
    }

    /// Caller-facing pairing: always answers with a [`PairingResponse`].
    pub fn authorize(&self, request: &PairingRequest) -> PairingResponse {
        match self.authorize_at(request, Instant::now()) {
            Ok(token) => PairingResponse::granted(token),
            Err(DaisyError::Denied(reason)) => PairingResponse::denied(reason.to_string()),
            Err(e) => PairingResponse::denied(e.to_string()),
        }
    }

    /// Validate `request` and mint a session token.
    pub fn authorize_at(&self, request: &PairingRequest, now: Instant) -> Result<String, DaisyError> {
        let deny = |reason: DenyReason| {
            warn!(device = %request.device_id, %reason, "pairing denied");
            DaisyError::Denied(reason)
        };

        if request.code.trim().is_empty()
            || request.device_id.trim().is_empty()
            || request.device_name.trim().is_empty()
        {
            return Err(deny(DenyReason::MalformedRequest));
        }

        let mut state = self.state.lock();
        let expiry = match state.codes.get(&request.code) {
            Some(expiry) => *expiry,
            None if state.used.contains_key(&request.code) => {
                return Err(deny(DenyReason::CodeAlreadyUsed));
            }
            None => return Err(deny(DenyReason::UnknownCode)),
        };
        if now >= expiry {
            state.codes.remove(&request.code);
            return Err(deny(DenyReason::CodeExpired));
        }

        state.codes.remove(&request.code);
        state.used.insert(request.code.clone(), expiry);

        let client_id = ClientId::from(request.device_id.as_str());
        let token = mint_token(&request.device_id, &request.code);
        state
            .tokens
            .insert(token.clone(), (client_id.clone(), now + self.config.token_ttl));

        let seen = Utc::now();
        state
            .clients
            .entry(client_id.clone())
            .and_modify(|c| {
                c.name = request.device_name.clone();
                c.last_seen = seen;
            })
            .or_insert_with(|| ClientInfo::paired(client_id.clone(), request.device_name.clone(), seen));

        info!(client = %client_id, name = %request.device_name, "device paired");
        Ok(token)
    }

    /// Consume a token, yielding the client it was minted for.
    pub fn redeem(&self, token: &str) -> Result<ClientId, DaisyError> {
        self.redeem_at(token, Instant::now())
    }

    /// Expired tokens are consumed and denied.
    pub fn redeem_at(&self, token: &str, now: Instant) -> Result<ClientId, DaisyError> {
        let mut state = self.state.lock();
        let (client_id, expiry) = state
            .tokens
            .remove(token)
            .ok_or(DaisyError::Denied(DenyReason::InvalidToken))?;
        if now >= expiry {
            debug!(client = %client_id, "token expired before redemption");
            return Err(DaisyError::Denied(DenyReason::InvalidToken));
        }
        if let Some(client) = state.clients.get_mut(&client_id) {
            client.last_seen = Utc::now();
        }
        Ok(client_id)
    }

    /// Paired clients, ordered by id. `connected` is left `false`.
    pub fn clients(&self) -> Vec<ClientInfo> {
        let state = self.state.lock();
        let mut out: Vec<ClientInfo> = state.clients.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn client(&self, id: &ClientId) -> Result<ClientInfo, DaisyError> {
        self.state
            .lock()
            .clients
            .get(id)
            .cloned()
            .ok_or_else(|| DaisyError::client_not_found(id))
    }

    /// Update descriptive fields reported by the device after pairing.
    pub fn update_client(
        &self,
        id: &ClientId,
        update: impl FnOnce(&mut ClientInfo),
    ) -> Result<(), DaisyError> {
        let mut state = self.state.lock();
        let client = state
            .clients
            .get_mut(id)
            .ok_or_else(|| DaisyError::client_not_found(id))?;
        let (id_before, connected) = (client.id.clone(), client.connected);
        update(client);
        client.id = id_before;
        client.connected = connected;
        Ok(())
    }

    /// Number of codes that can still be redeemed.
    pub fn outstanding_codes(&self) -> usize {
        self.state.lock().codes.len()
    }

    /// Number of minted tokens not yet redeemed or pruned.
    pub fn outstanding_tokens(&self) -> usize {
        self.state.lock().tokens.len()
    }

    /// Drop expired codes and tokens, and forget used codes past their
    /// lifetime.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.codes.len() + state.used.len() + state.tokens.len();
        state.codes.retain(|_, expiry| *expiry > now);
        state.used.retain(|_, expiry| *expiry > now);
        state.tokens.retain(|_, (_, expiry)| *expiry > now);
        before - (state.codes.len() + state.used.len() + state.tokens.len())
    }

    pub fn code_ttl(&self) -> Duration {
        self.config.code_ttl
    }

    pub fn token_ttl(&self) -> Duration {
        self.config.token_ttl
    }
}

fn mint_token(device_id: &str, code: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hasher.update(b":");
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.finalize().to_hex().to_string()
}

// ── Tests ────────────────────────────────────────────────────────
