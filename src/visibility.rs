//! Decides which content a given viewer may see.
//!
//! The rules are pure functions over (viewer, item metadata, relation
//! context); both repository backends filter listings through them so the
//! moderation gate and the privacy gate cannot drift apart.

use crate::models::{Id, ModerationStatus, Privacy};

/// The identity a request resolved to. Anonymous viewers are first-class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User { id: Id, staff: bool },
}

impl Viewer {
    pub fn id(&self) -> Option<Id> {
        match self {
            Viewer::Anonymous => None,
            Viewer::User { id, .. } => Some(*id),
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Viewer::User { staff: true, .. })
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Viewer::Anonymous)
    }
}

/// The visibility-relevant slice of an image, album or comment.
#[derive(Debug, Clone, Copy)]
pub struct ItemMeta {
    pub owner_id: Id,
    pub privacy: Privacy,
    pub moderation_status: ModerationStatus,
}

/// Viewer-to-item relations the pure rules cannot derive themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relation {
    /// There is a Follow edge (follower = viewer, followed = owner).
    pub follows_owner: bool,
    /// The viewer has a report (any status) against this item.
    pub has_reported: bool,
}

fn is_owner(viewer: &Viewer, item: &ItemMeta) -> bool {
    viewer.id() == Some(item.owner_id)
}

/// Privacy gate shared by listing and detail checks. Evaluated only after
/// the moderation gate has passed.
fn privacy_allows(viewer: &Viewer, item: &ItemMeta, rel: &Relation) -> bool {
    match item.privacy {
        Privacy::Public => true,
        Privacy::Users => viewer.is_authenticated(),
        Privacy::Followers => is_owner(viewer, item) || rel.follows_owner,
        Privacy::Private => is_owner(viewer, item),
    }
}

/// Whether an item belongs in a listing for this viewer.
///
/// Listings never surface anyone's pending or rejected content to non-staff,
/// not even the owner's own; owners get at their unapproved items through the
/// detail view only. Items the viewer personally reported are omitted.
pub fn visible_in_listing(viewer: &Viewer, item: &ItemMeta, rel: &Relation) -> bool {
    if viewer.is_staff() {
        return true;
    }
    if item.moderation_status != ModerationStatus::Approved {
        return false;
    }
    if rel.has_reported {
        return false;
    }
    privacy_allows(viewer, item, rel)
}

/// Whether a direct single-item fetch is permitted.
///
/// Unlike listings, owners may open their own pending/rejected items here,
/// and having reported an item does not block access to it.
pub fn can_view_detail(viewer: &Viewer, item: &ItemMeta, rel: &Relation) -> bool {
    if viewer.is_staff() {
        return true;
    }
    if item.moderation_status != ModerationStatus::Approved && !is_owner(viewer, item) {
        return false;
    }
    privacy_allows(viewer, item, rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Id = 1;
    const OTHER: Id = 2;

    fn meta(privacy: Privacy, status: ModerationStatus) -> ItemMeta {
        ItemMeta {
            owner_id: OWNER,
            privacy,
            moderation_status: status,
        }
    }

    fn user(id: Id) -> Viewer {
        Viewer::User { id, staff: false }
    }

    fn staff() -> Viewer {
        Viewer::User { id: 99, staff: true }
    }

    #[test]
    fn anonymous_sees_only_public_approved() {
        let rel = Relation::default();
        let approved_public = meta(Privacy::Public, ModerationStatus::Approved);
        assert!(visible_in_listing(&Viewer::Anonymous, &approved_public, &rel));
        assert!(can_view_detail(&Viewer::Anonymous, &approved_public, &rel));

        for privacy in [Privacy::Users, Privacy::Followers, Privacy::Private] {
            let m = meta(privacy, ModerationStatus::Approved);
            assert!(!visible_in_listing(&Viewer::Anonymous, &m, &rel));
            assert!(!can_view_detail(&Viewer::Anonymous, &m, &rel));
        }
        let pending = meta(Privacy::Public, ModerationStatus::Pending);
        assert!(!visible_in_listing(&Viewer::Anonymous, &pending, &rel));
    }

    #[test]
    fn private_visible_to_owner_and_staff_only() {
        let m = meta(Privacy::Private, ModerationStatus::Approved);
        let rel = Relation::default();
        assert!(can_view_detail(&user(OWNER), &m, &rel));
        assert!(can_view_detail(&staff(), &m, &rel));
        assert!(!can_view_detail(&user(OTHER), &m, &rel));
    }

    #[test]
    fn followers_gate_requires_follow_edge() {
        let m = meta(Privacy::Followers, ModerationStatus::Approved);
        assert!(!can_view_detail(&user(OTHER), &m, &Relation::default()));
        let following = Relation {
            follows_owner: true,
            ..Relation::default()
        };
        assert!(can_view_detail(&user(OTHER), &m, &following));
        // the owner never needs a follow edge to themselves
        assert!(can_view_detail(&user(OWNER), &m, &Relation::default()));
    }

    #[test]
    fn users_gate_admits_any_authenticated_viewer() {
        let m = meta(Privacy::Users, ModerationStatus::Approved);
        let rel = Relation::default();
        assert!(visible_in_listing(&user(OTHER), &m, &rel));
        assert!(!visible_in_listing(&Viewer::Anonymous, &m, &rel));
    }

    #[test]
    fn owner_sees_own_pending_in_detail_but_not_listing() {
        let m = meta(Privacy::Public, ModerationStatus::Pending);
        let rel = Relation::default();
        assert!(can_view_detail(&user(OWNER), &m, &rel));
        assert!(!visible_in_listing(&user(OWNER), &m, &rel));
        assert!(!can_view_detail(&user(OTHER), &m, &rel));
    }

    #[test]
    fn reported_items_drop_from_listings_only() {
        let m = meta(Privacy::Public, ModerationStatus::Approved);
        let reported = Relation {
            has_reported: true,
            ..Relation::default()
        };
        assert!(!visible_in_listing(&user(OTHER), &m, &reported));
        assert!(can_view_detail(&user(OTHER), &m, &reported));
    }

    #[test]
    fn staff_bypass_every_gate() {
        let m = meta(Privacy::Private, ModerationStatus::Rejected);
        let reported = Relation {
            has_reported: true,
            ..Relation::default()
        };
        assert!(visible_in_listing(&staff(), &m, &reported));
        assert!(can_view_detail(&staff(), &m, &reported));
    }
}
