//! Store collaborators: sessions, prekeys, signed prekeys and identities.
//!
//! The engine only needs load/store/contains/remove operations keyed by
//! [`ProtocolAddress`] or key id. Implementations must be `Send + Sync`; the
//! in-memory ones below are `Arc<Mutex<_>>` handles, so clones share state.

use crate::address::ProtocolAddress;
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, PublicKey};
use crate::locks::SessionLocks;
use crate::prekey::{PreKeyRecord, SignedPreKeyRecord};
use crate::record::SessionRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistence for session records.
pub trait SessionStore: Send + Sync {
    /// Loads the record for `address`, or a fresh empty one if none exists.
    ///
    /// The returned record is an independent copy; changes take effect only
    /// through [`SessionStore::store_session`].
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord>;

    /// Replaces the stored record. This is the commit point of every
    /// encrypt and decrypt.
    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;

    /// True if a current session that can encrypt exists for `address`.
    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool>;

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()>;

    /// Deletes the sessions of every device of recipient `name`.
    fn delete_all_sessions(&mut self, name: &str) -> Result<()>;

    /// Device ids of recipient `name` that have a stored record.
    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>>;

    /// Lock table guarding this store's records.
    ///
    /// Every handle onto the same underlying storage must return clones of
    /// one table, otherwise two ciphers for one address can interleave.
    fn session_locks(&self) -> SessionLocks;
}

/// Storage backend for one-time prekeys.
///
/// A prekey is removed once a session built from it has decrypted its first
/// message, so it is never used twice.
pub trait PreKeyStore: Send + Sync {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>>;

    /// Stores a prekey, replacing any with the same id.
    fn store_pre_key(&mut self, record: PreKeyRecord) -> Result<()>;

    fn contains_pre_key(&self, id: u32) -> Result<bool>;

    fn remove_pre_key(&mut self, id: u32) -> Result<()>;

    /// Number of prekeys left; useful for deciding when to upload more.
    fn pre_key_count(&self) -> Result<usize>;
}

/// Storage backend for signed prekeys.
pub trait SignedPreKeyStore: Send + Sync {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;

    /// Signed prekey currently published in our bundle.
    fn load_current_signed_pre_key(&self) -> Result<Option<SignedPreKeyRecord>>;

    /// Stores a signed prekey and makes it current.
    fn store_signed_pre_key(&mut self, record: SignedPreKeyRecord) -> Result<()>;

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool>;

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()>;
}

/// Local identity plus the pinned identities of remote recipients.
pub trait IdentityKeyStore: Send + Sync {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair>;

    fn local_registration_id(&self) -> Result<u32>;

    /// Whether `identity` may be used for `address`.
    fn is_trusted_identity(&self, address: &ProtocolAddress, identity: &PublicKey)
    -> Result<bool>;

    /// Pins `identity` for `address`. Returns true if it replaced a
    /// different pinned key.
    fn save_identity(&mut self, address: &ProtocolAddress, identity: &PublicKey) -> Result<bool>;

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<PublicKey>>;
}

/// Everything a session builder or cipher needs.
pub trait ProtocolStore: SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore {}

impl<T> ProtocolStore for T where T: SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore
{}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| Error::Storage)
}

/// Thread-safe in-memory session storage.
///
/// Records are kept serialized so that every load hands out a private copy.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<ProtocolAddress, Vec<u8>>>>,
    locks: SessionLocks,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord> {
        match lock(&self.sessions)?.get(address) {
            Some(bytes) => SessionRecord::deserialize(bytes),
            None => Ok(SessionRecord::new_fresh()),
        }
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        let bytes = record.serialize()?;
        lock(&self.sessions)?.insert(address.clone(), bytes);
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        let record = self.load_session(address)?;
        Ok(record
            .session_state()
            .is_some_and(crate::state::SessionState::has_sender_chain))
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        lock(&self.sessions)?.remove(address);
        Ok(())
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        lock(&self.sessions)?.retain(|address, _| address.name() != name);
        Ok(())
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        let mut devices: Vec<u32> = lock(&self.sessions)?
            .keys()
            .filter(|address| address.name() == name)
            .map(ProtocolAddress::device_id)
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }
    fn session_locks(&self) -> SessionLocks {
        self.locks.clone()
    }
}

/// Thread-safe in-memory prekey storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPreKeyStore {
    pre_keys: Arc<Mutex<HashMap<u32, PreKeyRecord>>>,
}

impl InMemoryPreKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-inserts prekeys, replacing any with the same ids.
    pub fn populate(&mut self, records: Vec<PreKeyRecord>) -> Result<()> {
        let mut store = lock(&self.pre_keys)?;
        for record in records {
            store.insert(record.id, record);
        }
        Ok(())
    }
}

impl PreKeyStore for InMemoryPreKeyStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        Ok(lock(&self.pre_keys)?.get(&id).cloned())
    }

    fn store_pre_key(&mut self, record: PreKeyRecord) -> Result<()> {
        lock(&self.pre_keys)?.insert(record.id, record);
        Ok(())
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        Ok(lock(&self.pre_keys)?.contains_key(&id))
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        lock(&self.pre_keys)?.remove(&id);
        Ok(())
    }

    fn pre_key_count(&self) -> Result<usize> {
        Ok(lock(&self.pre_keys)?.len())
    }
}

#[derive(Debug, Default)]
struct SignedPreKeys {
    records: HashMap<u32, SignedPreKeyRecord>,
    current: Option<u32>,
}

/// Thread-safe in-memory signed prekey storage. The most recently stored
/// record is current.
#[derive(Clone, Debug, Default)]
pub struct InMemorySignedPreKeyStore {
    signed_pre_keys: Arc<Mutex<SignedPreKeys>>,
}

impl InMemorySignedPreKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignedPreKeyStore for InMemorySignedPreKeyStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        Ok(lock(&self.signed_pre_keys)?.records.get(&id).cloned())
    }

    fn load_current_signed_pre_key(&self) -> Result<Option<SignedPreKeyRecord>> {
        let store = lock(&self.signed_pre_keys)?;
        Ok(store
            .current
            .and_then(|id| store.records.get(&id))
            .cloned())
    }

    fn store_signed_pre_key(&mut self, record: SignedPreKeyRecord) -> Result<()> {
        let mut store = lock(&self.signed_pre_keys)?;
        store.current = Some(record.id);
        store.records.insert(record.id, record);
        Ok(())
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        Ok(lock(&self.signed_pre_keys)?.records.contains_key(&id))
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        let mut store = lock(&self.signed_pre_keys)?;
        store.records.remove(&id);
        if store.current == Some(id) {
            store.current = None;
        }
        Ok(())
    }
}

/// Trust-on-first-use identity store.
///
/// The first identity seen for a recipient is pinned. A different key is
/// untrusted until [`IdentityKeyStore::save_identity`] replaces the pin.
#[derive(Clone, Debug)]
pub struct InMemoryIdentityKeyStore {
    identity: IdentityKeyPair,
    registration_id: u32,
    trusted: Arc<Mutex<HashMap<String, PublicKey>>>,
}

impl InMemoryIdentityKeyStore {
    #[must_use]
    pub fn new(identity: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity,
            registration_id,
            trusted: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl IdentityKeyStore for InMemoryIdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity.clone())
    }

    fn local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &PublicKey,
    ) -> Result<bool> {
        Ok(lock(&self.trusted)?
            .get(address.name())
            .is_none_or(|pinned| pinned == identity))
    }

    fn save_identity(&mut self, address: &ProtocolAddress, identity: &PublicKey) -> Result<bool> {
        let previous = lock(&self.trusted)?.insert(address.name().to_owned(), *identity);
        Ok(previous.is_some_and(|pinned| pinned != *identity))
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<PublicKey>> {
        Ok(lock(&self.trusted)?.get(address.name()).copied())
    }
}

/// All four in-memory stores behind one handle.
#[derive(Clone, Debug)]
pub struct InMemoryProtocolStore {
    pub session_store: InMemorySessionStore,
    pub pre_key_store: InMemoryPreKeyStore,
    pub signed_pre_key_store: InMemorySignedPreKeyStore,
    pub identity_store: InMemoryIdentityKeyStore,
}

impl InMemoryProtocolStore {
    #[must_use]
    pub fn new(identity: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            session_store: InMemorySessionStore::new(),
            pre_key_store: InMemoryPreKeyStore::new(),
            signed_pre_key_store: InMemorySignedPreKeyStore::new(),
            identity_store: InMemoryIdentityKeyStore::new(identity, registration_id),
        }
    }
}

impl SessionStore for InMemoryProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord> {
        self.session_store.load_session(address)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.session_store.store_session(address, record)
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        self.session_store.contains_session(address)
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.session_store.delete_session(address)
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        self.session_store.delete_all_sessions(name)
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        self.session_store.sub_device_sessions(name)
    }

    fn session_locks(&self) -> SessionLocks {
        self.session_store.session_locks()
    }
}

impl PreKeyStore for InMemoryProtocolStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        self.pre_key_store.load_pre_key(id)
    }

    fn store_pre_key(&mut self, record: PreKeyRecord) -> Result<()> {
        self.pre_key_store.store_pre_key(record)
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        self.pre_key_store.contains_pre_key(id)
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        self.pre_key_store.remove_pre_key(id)
    }

    fn pre_key_count(&self) -> Result<usize> {
        self.pre_key_store.pre_key_count()
    }
}

impl SignedPreKeyStore for InMemoryProtocolStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        self.signed_pre_key_store.load_signed_pre_key(id)
    }

    fn load_current_signed_pre_key(&self) -> Result<Option<SignedPreKeyRecord>> {
        self.signed_pre_key_store.load_current_signed_pre_key()
    }

    fn store_signed_pre_key(&mut self, record: SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_key_store.store_signed_pre_key(record)
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        self.signed_pre_key_store.contains_signed_pre_key(id)
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        self.signed_pre_key_store.remove_signed_pre_key(id)
    }
}

impl IdentityKeyStore for InMemoryProtocolStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.identity_store.identity_key_pair()
    }

    fn local_registration_id(&self) -> Result<u32> {
        self.identity_store.local_registration_id()
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &PublicKey,
    ) -> Result<bool> {
        self.identity_store.is_trusted_identity(address, identity)
    }

    fn save_identity(&mut self, address: &ProtocolAddress, identity: &PublicKey) -> Result<bool> {
        self.identity_store.save_identity(address, identity)
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<PublicKey>> {
        self.identity_store.get_identity(address)
    }
}
