//! Group-based applicability of a policy to a user.

use crate::models::{GateUser, PolicyVersion};

/// Decides whether a policy binds a user. Pure: no store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicabilityResolver {
    /// `true`: ungrouped policies apply to everyone.
    /// `false`: ungrouped policies apply only to users without any group.
    pub default_policy: bool,
}

impl ApplicabilityResolver {
    pub fn new(default_policy: bool) -> Self {
        Self { default_policy }
    }

    pub fn applies(&self, user: &GateUser, policy: &PolicyVersion) -> bool {
        match policy.for_group.as_deref() {
            Some(group) => user.is_member_of(group),
            None if self.default_policy => true,
            None => !user.has_groups(),
        }
    }
}

impl Default for ApplicabilityResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ungrouped() -> PolicyVersion {
        PolicyVersion::new("Terms", "").activated()
    }

    fn staff_only() -> PolicyVersion {
        PolicyVersion::new("Staff rules", "").for_group("staff").activated()
    }

    #[test]
    fn default_mode_ungrouped_applies_to_everyone() {
        let r = ApplicabilityResolver::new(true);
        assert!(r.applies(&GateUser::new("a"), &ungrouped()));
        assert!(r.applies(&GateUser::new("b").with_groups(["staff"]), &ungrouped()));
    }

    #[test]
    fn default_mode_grouped_applies_to_members_only() {
        let r = ApplicabilityResolver::new(true);
        assert!(r.applies(&GateUser::new("a").with_groups(["staff", "x"]), &staff_only()));
        assert!(!r.applies(&GateUser::new("b").with_groups(["guests"]), &staff_only()));
        assert!(!r.applies(&GateUser::new("c"), &staff_only()));
    }

    #[test]
    fn strict_mode_ungrouped_applies_only_without_groups() {
        let r = ApplicabilityResolver::new(false);
        assert!(r.applies(&GateUser::new("a"), &ungrouped()));
        assert!(!r.applies(&GateUser::new("b").with_groups(["guests"]), &ungrouped()));
    }

    #[test]
    fn strict_mode_grouped_still_applies_to_members() {
        let r = ApplicabilityResolver::new(false);
        assert!(r.applies(&GateUser::new("a").with_groups(["staff"]), &staff_only()));
        assert!(!r.applies(&GateUser::new("b"), &staff_only()));
    }
}
