use crate::common::PeerAddress;

#[derive(Debug, Default, Clone)]
/// The participants of a training session, in order of registration.
///
/// The registry is sealed while an aggregation round is in flight, during which no address can
/// be registered.
pub struct MembershipRegistry {
    members: Vec<PeerAddress>,
    sealed: bool,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an address.
    ///
    /// Returns `false` if the address is already registered or if the registry is sealed.
    pub fn register(&mut self, address: PeerAddress) -> bool {
        if self.sealed || self.contains(&address) {
            return false;
        }
        self.members.push(address);
        true
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.members.contains(address)
    }

    /// Gets the registered addresses in order of registration.
    pub fn addresses(&self) -> &[PeerAddress] {
        &self.members
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn unseal(&mut self) {
        self.sealed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = MembershipRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register("b".into()));
        assert!(registry.register("a".into()));
        assert!(!registry.register("b".into()));
        assert_eq!(registry.size(), 2);
        assert_eq!(
            registry.addresses(),
            &[PeerAddress::from("b"), PeerAddress::from("a")]
        );
    }

    #[test]
    fn test_sealed_registry_rejects_new_members() {
        let mut registry = MembershipRegistry::new();
        registry.register("a".into());
        registry.seal();
        assert!(!registry.register("b".into()));
        assert!(!registry.contains(&"b".into()));
        registry.unseal();
        assert!(registry.register("b".into()));
        assert_eq!(registry.size(), 2);
    }
}
