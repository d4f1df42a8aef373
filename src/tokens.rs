//! Single-use missed-message reply addresses
//!
//! A missed-message address lets a user answer a notification email and have
//! the reply routed back into the conversation it came from. The address
//! local-part is `mm` followed by a 32-character random token; the token keys
//! a record in the [`KeyValueStore`] holding the user, the recipient, the
//! subject and a use counter, with a five-day TTL.

use std::sync::Arc;
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};

use crate::address::AddressCodec;
use crate::directory::{RecipientId, UserId};
use crate::errors::{ForwardError, ForwardResult};
use crate::kv::KeyValueStore;

/// Local-part marker for missed-message addresses
pub const MISSED_MESSAGE_PREFIX: &str = "mm";
/// Length of the random token after the marker
pub const TOKEN_LENGTH: usize = 32;
/// Record lifetime, refreshed on every write
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 5);

const KEY_PREFIX: &str = "missed_message:";
const FIELD_USES_LEFT: &str = "uses_left";
const FIELD_USER_ID: &str = "user_id";
const FIELD_RECIPIENT_ID: &str = "recipient_id";
const FIELD_SUBJECT: &str = "subject";

/// Routing data stored behind a missed-message token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedMessageData {
    /// User the notification was sent to (the reply's sender)
    pub user_id: UserId,
    /// Conversation the reply goes back into
    pub recipient_id: RecipientId,
    /// Topic of the original message
    pub subject: String,
}

/// Source of fresh random tokens
pub type TokenSource = Box<dyn Fn() -> String + Send + Sync>;

/// Missed-message token store
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    codec: Arc<AddressCodec>,
    noreply_address: String,
    next_token: TokenSource,
}

impl TokenStore {
    /// Create a token store drawing tokens from the OS random source
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<AddressCodec>,
        noreply_address: impl Into<String>,
    ) -> Self {
        Self::with_token_source(
            store,
            codec,
            noreply_address,
            Box::new(|| Alphanumeric.sample_string(&mut rand::rng(), TOKEN_LENGTH)),
        )
    }

    /// Create a token store with a custom token source
    pub fn with_token_source(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<AddressCodec>,
        noreply_address: impl Into<String>,
        next_token: TokenSource,
    ) -> Self {
        Self {
            store,
            codec,
            noreply_address: noreply_address.into(),
            next_token,
        }
    }

    /// Create a fresh single-use reply address
    ///
    /// Retries with a new token if the random one is already taken. When the
    /// gateway is disabled, returns the no-reply address instead.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backing store fails.
    pub fn generate(
        &self,
        user_id: UserId,
        recipient_id: RecipientId,
        subject: &str,
    ) -> ForwardResult<String> {
        if !self.codec.is_enabled() {
            tracing::warn!("gateway address template is empty, using the no-reply address");
            return Ok(self.noreply_address.clone());
        }

        let fields = [
            (FIELD_USES_LEFT, "1".to_owned()),
            (FIELD_USER_ID, user_id.to_string()),
            (FIELD_RECIPIENT_ID, recipient_id.to_string()),
            (FIELD_SUBJECT, subject.to_owned()),
        ];
        let token = loop {
            let token = (self.next_token)();
            if self
                .store
                .insert_if_absent(&record_key(&token), &fields, TOKEN_TTL)?
            {
                break token;
            }
            tracing::debug!("missed message token collision, retrying");
        };

        Ok(self
            .codec
            .render(&format!("{MISSED_MESSAGE_PREFIX}{token}")))
    }

    /// Whether an address is a missed-message address
    pub fn is_missed_message_address(&self, address: &str) -> bool {
        self.codec
            .local_part(address)
            .is_ok_and(|local| is_missed_message_format(&local))
    }

    /// Claim one use of a missed-message address
    ///
    /// Decrements the use counter and refreshes the TTL atomically, then
    /// checks the new value. Two racing consumers may both pass the decrement
    /// before either checks; only one observes a non-negative count.
    ///
    /// # Errors
    ///
    /// - `UnrecognizedAddress`/`MalformedAddress` for non missed-message addresses
    /// - `AddressExhausted` if the address was already used or never existed
    pub fn consume(&self, address: &str) -> ForwardResult<()> {
        let key = record_key(&self.token_from_address(address)?);
        let uses_left = self
            .store
            .increment_and_touch(&key, FIELD_USES_LEFT, -1, TOKEN_TTL)?;
        if uses_left < 0 {
            self.store.delete(&key)?;
            return Err(ForwardError::AddressExhausted);
        }
        Ok(())
    }

    /// Read the routing data behind a missed-message address
    ///
    /// # Errors
    ///
    /// Returns `MissingData` if any field is absent or unreadable, which
    /// covers expired and tampered addresses.
    pub fn resolve(&self, address: &str) -> ForwardResult<MissedMessageData> {
        let key = record_key(&self.token_from_address(address)?);
        let values = self
            .store
            .get_fields(&key, &[FIELD_USER_ID, FIELD_RECIPIENT_ID, FIELD_SUBJECT])?;

        let values: [Option<String>; 3] = values
            .try_into()
            .map_err(|_| ForwardError::Storage("unexpected field count".to_owned()))?;
        let [Some(user_id), Some(recipient_id), Some(subject)] = values else {
            return Err(ForwardError::MissingData(address.to_owned()));
        };

        Ok(MissedMessageData {
            user_id: user_id
                .parse()
                .map_err(|_| ForwardError::MissingData(address.to_owned()))?,
            recipient_id: recipient_id
                .parse()
                .map_err(|_| ForwardError::MissingData(address.to_owned()))?,
            subject,
        })
    }

    /// Strip the `mm` marker from a missed-message address
    fn token_from_address(&self, address: &str) -> ForwardResult<String> {
        let local = self.codec.local_part(address)?;
        if !is_missed_message_format(&local) {
            return Err(ForwardError::MalformedAddress(format!(
                "could not parse missed message address {address}"
            )));
        }
        Ok(local[MISSED_MESSAGE_PREFIX.len()..].to_owned())
    }
}

/// Whether a local-part has the `mm` + 32 character shape
pub fn is_missed_message_format(segment: &str) -> bool {
    segment.starts_with(MISSED_MESSAGE_PREFIX)
        && segment.chars().count() == MISSED_MESSAGE_PREFIX.len() + TOKEN_LENGTH
}

fn record_key(token: &str) -> String {
    format!("{KEY_PREFIX}{token}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::{MissedMessageData, TokenStore, is_missed_message_format};
    use crate::address::AddressCodec;
    use crate::errors::ForwardError;
    use crate::kv::{KeyValueStore, MemoryStore};

    fn codec() -> Arc<AddressCodec> {
        Arc::new(AddressCodec::new("%s@example.com", None).expect("valid template"))
    }

    fn store() -> TokenStore {
        TokenStore::new(Arc::new(MemoryStore::new()), codec(), "noreply@example.com")
    }

    fn local_part(address: &str) -> &str {
        address.split('@').next().unwrap_or_default()
    }

    #[test]
    fn generated_address_has_missed_message_shape() {
        let tokens = store();
        let address = tokens.generate(7, 42, "lunch").expect("generate");
        let local = local_part(&address);
        assert_eq!(local.len(), 34);
        assert!(local.starts_with("mm"));
        assert!(local.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(address.ends_with("@example.com"));
        assert!(tokens.is_missed_message_address(&address));
        assert_eq!(
            tokens.resolve(&address).expect("resolve"),
            MissedMessageData {
                user_id: 7,
                recipient_id: 42,
                subject: "lunch".to_owned(),
            }
        );
    }

    #[test]
    fn missed_message_format_requires_prefix_and_length() {
        assert!(is_missed_message_format(&format!("mm{}", "a".repeat(32))));
        assert!(!is_missed_message_format(&format!("mm{}", "a".repeat(31))));
        assert!(!is_missed_message_format(&format!("xx{}", "a".repeat(32))));
        assert!(!is_missed_message_format("general+abc123"));
    }

    #[test]
    fn disabled_gateway_returns_noreply_address() {
        let tokens = TokenStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AddressCodec::new("", None).expect("empty template")),
            "noreply@example.com",
        );
        assert_eq!(
            tokens.generate(1, 2, "s").expect("generate"),
            "noreply@example.com"
        );
    }

    #[test]
    fn generate_retries_on_token_collision() {
        let kv = Arc::new(MemoryStore::new());
        let taken = "a".repeat(32);
        kv.insert_if_absent(
            &format!("missed_message:{taken}"),
            &[("uses_left", "1".to_owned())],
            super::TOKEN_TTL,
        )
        .expect("seed");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let tokens = TokenStore::with_token_source(
            kv,
            codec(),
            "noreply@example.com",
            Box::new(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    "a".repeat(32)
                } else {
                    "b".repeat(32)
                }
            }),
        );

        let address = tokens.generate(1, 2, "s").expect("generate");
        assert_eq!(address, format!("mm{}@example.com", "b".repeat(32)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_generation_yields_distinct_addresses() {
        let tokens = store();
        let (first, second) = thread::scope(|s| {
            let a = s.spawn(|| tokens.generate(1, 2, "same").expect("generate"));
            let b = s.spawn(|| tokens.generate(1, 2, "same").expect("generate"));
            (
                a.join().expect("thread a"),
                b.join().expect("thread b"),
            )
        });
        assert_ne!(first, second);
        assert_eq!(local_part(&first).len(), 34);
        assert_eq!(local_part(&second).len(), 34);
    }

    #[test]
    fn address_is_single_use() {
        let tokens = store();
        let address = tokens.generate(1, 2, "s").expect("generate");
        tokens.consume(&address).expect("first use succeeds");
        assert_eq!(
            tokens.consume(&address).expect_err("second use fails"),
            ForwardError::AddressExhausted
        );
        assert!(matches!(
            tokens.resolve(&address),
            Err(ForwardError::MissingData(_))
        ));
    }

    #[test]
    fn concurrent_consumers_get_exactly_one_success() {
        let tokens = store();
        let address = tokens.generate(1, 2, "s").expect("generate");

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| tokens.consume(&address)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("consumer thread"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == ForwardError::AddressExhausted)
        );
        assert!(tokens.resolve(&address).is_err());
    }

    #[test]
    fn unknown_token_is_exhausted() {
        let tokens = store();
        let address = format!("mm{}@example.com", "c".repeat(32));
        assert_eq!(
            tokens.consume(&address).expect_err("unknown token"),
            ForwardError::AddressExhausted
        );
    }

    #[test]
    fn channel_addresses_are_not_missed_message_addresses() {
        let tokens = store();
        assert!(!tokens.is_missed_message_address("general+abc123@example.com"));
        assert!(!tokens.is_missed_message_address("nobody@other.org"));
        assert!(matches!(
            tokens.consume("general+abc123@example.com"),
            Err(ForwardError::MalformedAddress(_))
        ));
        assert!(matches!(
            tokens.resolve("nobody@other.org"),
            Err(ForwardError::UnrecognizedAddress(_))
        ));
    }
}
