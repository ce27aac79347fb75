//! Subscription construction parameters (spec §3 "Subscription config",
//! §6 "Construction parameters").

use crate::position::StartPosition;

/// Default read page size used when a caller does not override it.
pub const DEFAULT_READ_BATCH_SIZE: u32 = 500;

/// Opaque credentials attached to every outbound request when present.
///
/// Propagation over the wire is the connection actor's concern (out of
/// scope for the core, see spec §1); the core only guarantees it is
/// threaded through unchanged onto every [`crate::connection::Outbound`]
/// message (P7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Immutable configuration for a subscription, set at construction and
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings<P> {
    pub(crate) from: StartPosition<P>,
    pub(crate) resolve_link_tos: bool,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) read_batch_size: u32,
    pub(crate) infinite: bool,
}

impl<P> Default for SubscriptionSettings<P> {
    fn default() -> Self {
        Self {
            from: StartPosition::Beginning,
            resolve_link_tos: false,
            credentials: None,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            infinite: true,
        }
    }
}

impl<P> SubscriptionSettings<P> {
    /// Starts building settings for a subscription beginning at the given
    /// [`StartPosition`].
    #[inline]
    #[must_use]
    pub fn new(from: StartPosition<P>) -> Self {
        Self {
            from,
            ..Self::default()
        }
    }

    /// Sets whether link events should be resolved by the transport.
    #[inline]
    #[must_use]
    pub fn resolve_link_tos(mut self, resolve: bool) -> Self {
        self.resolve_link_tos = resolve;
        self
    }

    /// Attaches credentials to every outbound request.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the historical read page size. Panics if `size == 0`, since
    /// the data model requires `read_batch_size: u32 > 0`.
    #[inline]
    #[must_use]
    pub fn read_batch_size(mut self, size: u32) -> Self {
        assert!(size > 0, "read_batch_size must be greater than zero");
        self.read_batch_size = size;
        self
    }

    /// Sets whether the subscription transitions to live push after
    /// draining history (`true`, the default) or completes at end-of-stream
    /// (`false`, finite mode).
    #[inline]
    #[must_use]
    pub fn infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::EventNumber;

    #[test]
    fn defaults_match_spec() {
        let settings = SubscriptionSettings::<EventNumber>::default();

        assert_eq!(settings.from, StartPosition::Beginning);
        assert!(!settings.resolve_link_tos);
        assert!(settings.credentials.is_none());
        assert!(settings.infinite);
        assert_eq!(settings.read_batch_size, DEFAULT_READ_BATCH_SIZE);
    }

    #[test]
    #[should_panic(expected = "read_batch_size must be greater than zero")]
    fn rejects_zero_batch_size() {
        let _ = SubscriptionSettings::<EventNumber>::default().read_batch_size(0);
    }
}
