//! Friends store - directed friendship edges with computed reciprocity
//!
//! Each row is one directed edge: the flags a principal grants a friend.
//! The reverse direction is its own row. Friend listings join it back in
//! at read time as "their flags", with a sentinel when the friendship is
//! not mutual.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::record::{self, FieldKind, FieldSpec, FieldValue, Record};
use crate::schema::{FRIENDS_STORE, Migrator};
use crate::table::TableHandler;
use crate::Result;

/// Default realm for friend links
pub const DEFAULT_REALM: &str = "friends";

/// Bag key for the flags a principal grants the friend
pub const FLAGS_KEY: &str = "Flags";

/// Bag key for the reciprocal edge's flags, present on friend listings
pub const THEIR_FLAGS_KEY: &str = "TheirFlags";

/// Sentinel flag value meaning "no reciprocal edge"
pub const NOT_MUTUAL: i32 = -1;

/// One directed friendship edge.
///
/// Both endpoints are text on purpose: identifiers may be compound (an
/// id plus a location suffix), which is also why friend listings match
/// the principal by prefix. Flags and any extra columns ride in the bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendLink {
    pub principal_id: String,
    pub friend: String,
    pub data: BTreeMap<String, String>,
}

impl FriendLink {
    pub fn new(principal_id: impl Into<String>, friend: impl Into<String>, flags: i32) -> Self {
        let mut data = BTreeMap::new();
        data.insert(FLAGS_KEY.to_string(), flags.to_string());
        Self {
            principal_id: principal_id.into(),
            friend: friend.into(),
            data,
        }
    }

    /// Flags this principal grants the friend (0 when unset)
    pub fn my_flags(&self) -> i32 {
        self.data
            .get(FLAGS_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Flags the friend grants back; [`NOT_MUTUAL`] when there is no
    /// reciprocal edge or this link did not come from a friend listing
    pub fn their_flags(&self) -> i32 {
        self.data
            .get(THEIR_FLAGS_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(NOT_MUTUAL)
    }
}

impl Record for FriendLink {
    fn fields() -> &'static [FieldSpec<Self>] {
        const FIELDS: &[FieldSpec<FriendLink>] = &[
            FieldSpec {
                name: "PrincipalID",
                kind: FieldKind::Text,
                get: |r| Some(FieldValue::Text(r.principal_id.clone())),
                set: |r, v| {
                    if let FieldValue::Text(s) = v {
                        r.principal_id = s;
                    }
                },
            },
            FieldSpec {
                name: "Friend",
                kind: FieldKind::Text,
                get: |r| Some(FieldValue::Text(r.friend.clone())),
                set: |r, v| {
                    if let FieldValue::Text(s) = v {
                        r.friend = s;
                    }
                },
            },
        ];
        FIELDS
    }

    fn attributes(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.data)
    }

    fn attributes_mut(&mut self) -> Option<&mut BTreeMap<String, String>> {
        Some(&mut self.data)
    }
}

/// Typed view of one friend listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub principal_id: String,
    pub friend: String,
    pub my_flags: i32,
    pub their_flags: i32,
}

impl From<&FriendLink> for FriendInfo {
    fn from(link: &FriendLink) -> Self {
        Self {
            principal_id: link.principal_id.clone(),
            friend: link.friend.clone(),
            my_flags: link.my_flags(),
            their_flags: link.their_flags(),
        }
    }
}

/// Directed-edge store built on the generic table handler
pub struct FriendsStore {
    handler: TableHandler<FriendLink>,
}

impl FriendsStore {
    /// Create a store on `realm` without touching the schema
    pub fn new(db: Arc<Database>, realm: impl Into<String>) -> Self {
        Self {
            handler: TableHandler::new(db, realm),
        }
    }

    /// Create a store, bringing the friends schema to its latest revision first
    pub fn with_migration(
        db: Arc<Database>,
        realm: impl Into<String>,
        migrator: &dyn Migrator,
    ) -> Result<Self> {
        Ok(Self {
            handler: TableHandler::with_migration(db, realm, migrator, FRIENDS_STORE)?,
        })
    }

    /// The underlying generic handler, for predicate reads and counts
    pub fn table(&self) -> &TableHandler<FriendLink> {
        &self.handler
    }

    /// Upsert one directed edge
    pub fn store(&self, link: &FriendLink) -> Result<bool> {
        self.handler.store(link)
    }

    /// The exact directed edge principal -> friend, if stored
    pub fn friendship(&self, principal_id: &str, friend: &str) -> Result<Option<FriendLink>> {
        let mut links = self
            .handler
            .get(&["PrincipalID", "Friend"], &[principal_id, friend])?;
        if links.is_empty() {
            Ok(None)
        } else {
            Ok(Some(links.remove(0)))
        }
    }

    /// Every edge whose principal starts with `principal_id`, with the
    /// reciprocal edge's flags joined in under [`THEIR_FLAGS_KEY`].
    ///
    /// Prefix matching lets a bare identifier find edges stored under a
    /// compound one.
    pub fn get_friends(&self, principal_id: &str) -> Result<Vec<FriendLink>> {
        let realm = self.handler.realm();
        let sql = format!(
            "SELECT a.*, CASE WHEN b.\"Flags\" IS NULL THEN {NOT_MUTUAL} ELSE b.\"Flags\" END AS \"TheirFlags\" \
             FROM {realm} AS a LEFT JOIN {realm} AS b \
             ON a.\"PrincipalID\" = b.\"Friend\" AND a.\"Friend\" = b.\"PrincipalID\" \
             WHERE a.\"PrincipalID\" LIKE ?"
        );
        let pattern = format!("{principal_id}%");
        self.handler.query_rows(&sql, [pattern], |row, columns, link| {
            // TheirFlags is computed by this query; read it off the raw
            // row even when the column cache latched on a plain select
            if let Some(idx) = columns.iter().position(|c| c == THEIR_FLAGS_KEY) {
                link.data.insert(
                    THEIR_FLAGS_KEY.to_string(),
                    record::display_string(row.get_ref(idx)?),
                );
            }
            Ok(())
        })
    }

    /// Friend listing as typed entries
    pub fn get_friend_infos(&self, principal_id: &str) -> Result<Vec<FriendInfo>> {
        let links = self.get_friends(principal_id)?;
        Ok(links.iter().map(FriendInfo::from).collect())
    }

    /// Remove exactly the directed edge principal -> friend.
    ///
    /// The reciprocal edge, if any, stays. Reports whether a row went away.
    pub fn delete(&self, principal_id: &str, friend: &str) -> Result<bool> {
        self.handler
            .delete(&["PrincipalID", "Friend"], &[principal_id, friend])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Migrations;

    fn friends_store() -> FriendsStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        FriendsStore::with_migration(db, DEFAULT_REALM, &Migrations).unwrap()
    }

    const ALICE: &str = "11111111-1111-1111-1111-111111111111";
    const BOB: &str = "22222222-2222-2222-2222-222222222222";
    const CLARA: &str = "33333333-3333-3333-3333-333333333333";

    #[test]
    fn one_sided_friendship_reads_the_sentinel() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();

        let friends = store.get_friends(ALICE).unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].friend, BOB);
        assert_eq!(friends[0].my_flags(), 1);
        assert_eq!(friends[0].their_flags(), NOT_MUTUAL);
    }

    #[test]
    fn mutual_friendship_carries_both_flag_sets() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();
        store.store(&FriendLink::new(BOB, ALICE, 2)).unwrap();

        let alices = store.get_friends(ALICE).unwrap();
        assert_eq!(alices[0].my_flags(), 1);
        assert_eq!(alices[0].their_flags(), 2);

        let bobs = store.get_friends(BOB).unwrap();
        assert_eq!(bobs[0].my_flags(), 2);
        assert_eq!(bobs[0].their_flags(), 1);
    }

    #[test]
    fn listing_matches_the_principal_by_prefix() {
        let store = friends_store();
        let compound = format!("{ALICE};grid.example.org;region");
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();
        store.store(&FriendLink::new(compound, CLARA, 1)).unwrap();
        store.store(&FriendLink::new(BOB, ALICE, 1)).unwrap();

        let friends = store.get_friends(ALICE).unwrap();
        assert_eq!(friends.len(), 2);
        assert_eq!(store.get_friends(BOB).unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_only_one_direction() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();
        store.store(&FriendLink::new(BOB, ALICE, 2)).unwrap();

        assert!(store.delete(ALICE, BOB).unwrap());
        assert!(store.friendship(ALICE, BOB).unwrap().is_none());
        assert!(store.friendship(BOB, ALICE).unwrap().is_some());

        // Gone edges report false on a second delete
        assert!(!store.delete(ALICE, BOB).unwrap());
    }

    #[test]
    fn storing_an_edge_twice_updates_in_place() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();
        store.store(&FriendLink::new(ALICE, BOB, 3)).unwrap();

        assert_eq!(store.table().count_by("PrincipalID", ALICE).unwrap(), 1);
        let link = store.friendship(ALICE, BOB).unwrap().unwrap();
        assert_eq!(link.my_flags(), 3);
    }

    #[test]
    fn exact_lookup_carries_schema_columns_in_the_bag() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 5)).unwrap();

        let link = store.friendship(ALICE, BOB).unwrap().unwrap();
        assert_eq!(link.my_flags(), 5);
        assert_eq!(link.data.get("Offered").map(String::as_str), Some("0"));
        // Exact lookups never compute reciprocity
        assert_eq!(link.their_flags(), NOT_MUTUAL);
    }

    #[test]
    fn listing_works_when_a_plain_lookup_latched_the_cache_first() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();
        store.store(&FriendLink::new(BOB, ALICE, 2)).unwrap();

        // Plain select first: the cache latches without TheirFlags
        let _ = store.friendship(ALICE, BOB).unwrap();

        // The listing still reports reciprocal flags
        let friends = store.get_friends(ALICE).unwrap();
        assert_eq!(friends[0].their_flags(), 2);
    }

    #[test]
    fn plain_lookup_works_when_the_listing_latched_the_cache_first() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 4)).unwrap();

        // Listing first: the cache latches with TheirFlags included
        assert_eq!(store.get_friends(ALICE).unwrap().len(), 1);

        // The exact lookup's narrower rows skip the absent computed column
        let link = store.friendship(ALICE, BOB).unwrap().unwrap();
        assert_eq!(link.my_flags(), 4);
        assert_eq!(link.data.get("Offered").map(String::as_str), Some("0"));
        assert!(!link.data.contains_key(THEIR_FLAGS_KEY));
        assert_eq!(link.their_flags(), NOT_MUTUAL);
    }

    #[test]
    fn typed_view_mirrors_the_link() {
        let store = friends_store();
        store.store(&FriendLink::new(ALICE, BOB, 1)).unwrap();

        let infos = store.get_friend_infos(ALICE).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].principal_id, ALICE);
        assert_eq!(infos[0].friend, BOB);
        assert_eq!(infos[0].my_flags, 1);
        assert_eq!(infos[0].their_flags, NOT_MUTUAL);
    }
}
