//! Per-address session record: the current state plus archived states.
//!
//! Archived states stay decryptable so messages sent under a session that
//! has since been replaced (for example after simultaneous initiation) can
//! still be read. The archive is bounded; the oldest state is dropped first.

use crate::error::{Error, Result};
use crate::keys::PublicKey;
use crate::state::SessionState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Current and previous session states for one remote address.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    current_session: Option<SessionState>,
    previous_sessions: VecDeque<SessionState>,
}

impl SessionRecord {
    /// Record with no sessions at all
    #[must_use]
    pub fn new_fresh() -> Self {
        Self::default()
    }

    /// Record whose current state is `state`
    #[must_use]
    pub fn new(state: SessionState) -> Self {
        Self {
            current_session: Some(state),
            previous_sessions: VecDeque::new(),
        }
    }

    /// True when neither a current nor an archived state exists.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.current_session.is_none() && self.previous_sessions.is_empty()
    }

    /// Whether any held state was opened with `alice_base_key` at `version`.
    #[must_use]
    pub fn has_session_state(&self, version: u8, alice_base_key: &PublicKey) -> bool {
        self.current_session
            .iter()
            .chain(self.previous_sessions.iter())
            .any(|state| {
                state.session_version() == version && state.alice_base_key() == alice_base_key
            })
    }

    /// Current state, if any
    #[must_use]
    pub fn session_state(&self) -> Option<&SessionState> {
        self.current_session.as_ref()
    }

    pub(crate) fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current_session.as_mut()
    }

    /// Replaces the current state without archiving it.
    pub fn set_session_state(&mut self, state: SessionState) {
        self.current_session = Some(state);
    }

    /// Archived states, most recent first.
    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous_sessions.iter()
    }

    /// Number of archived states.
    #[must_use]
    pub fn previous_session_count(&self) -> usize {
        self.previous_sessions.len()
    }

    /// Archives the current state (if any) and installs `state` as current.
    pub fn promote_state(&mut self, state: SessionState, max_archived: usize) {
        self.archive_current_state(max_archived);
        self.current_session = Some(state);
    }

    /// Moves the current state to the front of the archive.
    pub fn archive_current_state(&mut self, max_archived: usize) {
        if let Some(current) = self.current_session.take() {
            self.previous_sessions.push_front(current);
            self.previous_sessions.truncate(max_archived);
        }
    }

    /// Replaces archived state `index` with `updated` and makes it current.
    pub fn promote_old_session(
        &mut self,
        index: usize,
        updated: SessionState,
        max_archived: usize,
    ) -> Result<()> {
        self.previous_sessions
            .remove(index)
            .ok_or(Error::InvalidState("archived session index out of range"))?;
        self.promote_state(updated, max_archived);
        Ok(())
    }

    /// Encodes the record for a session store.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    /// Decodes a record produced by [`SessionRecord::serialize`].
    ///
    /// Input with bytes left over after the record is rejected.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (record, read) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(Error::Deserialization);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricKey;
    use crate::keys::SecretKey;
    use crate::ratchet::RootKey;
    use rand_core::OsRng;

    fn state_with_base(base: PublicKey) -> SessionState {
        let identity = SecretKey::generate(&mut OsRng).public_key();
        SessionState::new(
            3,
            identity,
            identity,
            RootKey::new(SymmetricKey::from_bytes([5u8; 32])),
            base,
        )
    }

    fn fresh_base() -> PublicKey {
        SecretKey::generate(&mut OsRng).public_key()
    }

    #[test]
    fn test_fresh_record() {
        let record = SessionRecord::new_fresh();
        assert!(record.is_fresh());
        assert!(record.session_state().is_none());
        assert!(!record.has_session_state(3, &fresh_base()));
    }

    #[test]
    fn test_promote_archives_current() {
        let first = fresh_base();
        let second = fresh_base();
        let mut record = SessionRecord::new(state_with_base(first));

        record.promote_state(state_with_base(second), 40);

        assert_eq!(record.session_state().unwrap().alice_base_key(), &second);
        assert_eq!(record.previous_session_count(), 1);
        assert!(record.has_session_state(3, &first));
        assert!(record.has_session_state(3, &second));
        assert!(!record.has_session_state(2, &second));
    }

    #[test]
    fn test_archive_is_bounded() {
        let bases: Vec<PublicKey> = (0..6).map(|_| fresh_base()).collect();
        let mut record = SessionRecord::new_fresh();
        for base in &bases {
            record.promote_state(state_with_base(*base), 3);
        }

        assert_eq!(record.previous_session_count(), 3);
        // Most recent archived state first; the oldest two were dropped
        let archived: Vec<PublicKey> = record
            .previous_session_states()
            .map(|s| *s.alice_base_key())
            .collect();
        assert_eq!(archived, vec![bases[4], bases[3], bases[2]]);
        assert!(!record.has_session_state(3, &bases[0]));
    }

    #[test]
    fn test_promote_old_session() {
        let old = fresh_base();
        let new = fresh_base();
        let mut record = SessionRecord::new(state_with_base(old));
        record.promote_state(state_with_base(new), 40);

        let updated = record.previous_session_states().next().unwrap().clone();
        record.promote_old_session(0, updated, 40).unwrap();

        assert_eq!(record.session_state().unwrap().alice_base_key(), &old);
        assert_eq!(record.previous_session_count(), 1);
        assert_eq!(
            record.previous_session_states().next().unwrap().alice_base_key(),
            &new
        );

        let stale = state_with_base(old);
        assert!(record.promote_old_session(5, stale, 40).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let base = fresh_base();
        let mut record = SessionRecord::new(state_with_base(fresh_base()));
        record.promote_state(state_with_base(base), 40);

        let bytes = record.serialize().unwrap();
        let decoded = SessionRecord::deserialize(&bytes).unwrap();

        assert_eq!(decoded.session_state().unwrap().alice_base_key(), &base);
        assert_eq!(decoded.previous_session_count(), 1);
        assert_eq!(
            SessionRecord::deserialize(&[0xFF, 0xFF]).unwrap_err(),
            Error::Deserialization
        );
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let record = SessionRecord::new(state_with_base(fresh_base()));
        let mut bytes = record.serialize().unwrap();
        assert!(SessionRecord::deserialize(&bytes).is_ok());

        bytes.extend_from_slice(&[0x00, 0x01]);
        assert_eq!(
            SessionRecord::deserialize(&bytes).unwrap_err(),
            Error::Deserialization
        );
    }
}
