//! Interaction logs, id remapping, sparse interaction matrices and splits.
use std::hash::Hasher;

use rand::Rng;

use siphasher::sip::SipHasher;

use super::{ExternalId, ItemId, RecommendError, Result, UserId};

/// A single raw interaction, as read from an interaction log.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LogRecord {
    /// External user identifier.
    pub user_id: ExternalId,
    /// External item identifier.
    pub item_id: ExternalId,
    /// Optional interaction time.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl LogRecord {
    /// Build a new record without a timestamp.
    pub fn new(user_id: ExternalId, item_id: ExternalId) -> Self {
        LogRecord {
            user_id,
            item_id,
            timestamp: None,
        }
    }
}

/// Mapping from external identifiers to dense, zero-based indices.
///
/// Identifiers are sorted and de-duplicated; the index of an identifier is
/// its position in the sorted list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdMap {
    ids: Vec<ExternalId>,
}

impl IdMap {
    /// Build a mapping from an arbitrary collection of identifiers.
    pub fn new<I: IntoIterator<Item = ExternalId>>(ids: I) -> Self {
        let mut ids: Vec<ExternalId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        IdMap { ids }
    }

    /// Dense index of an external identifier.
    pub fn index_of(&self, id: ExternalId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// External identifier at a dense index.
    pub fn id_at(&self, index: usize) -> Option<ExternalId> {
        self.ids.get(index).cloned()
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Row-compressed (CSR) implicit-feedback matrix.
///
/// Every stored entry has value 1; rows hold sorted, unique item indices.
#[derive(Clone, Debug, PartialEq)]
pub struct InteractionMatrix {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
}

impl InteractionMatrix {
    /// Build a matrix from `(user, item)` pairs. Duplicate pairs collapse
    /// into a single entry.
    pub fn from_pairs(
        num_users: usize,
        num_items: usize,
        pairs: &[(UserId, ItemId)],
    ) -> Result<Self> {
        if let Some(&(user_id, item_id)) = pairs
            .iter()
            .find(|&&(user_id, item_id)| user_id >= num_users || item_id >= num_items)
        {
            return Err(RecommendError::InvalidShape {
                expected: (num_users, num_items),
                found: (user_id + 1, item_id + 1),
            });
        }

        let mut data = pairs.to_owned();
        data.sort_unstable();
        data.dedup();

        let mut user_pointers = vec![0; num_users + 1];
        let mut item_ids = Vec::with_capacity(data.len());

        for &(user_id, item_id) in &data {
            item_ids.push(item_id);
            user_pointers[user_id + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        Ok(InteractionMatrix {
            num_users,
            num_items,
            user_pointers,
            item_ids,
        })
    }

    /// An empty matrix of the given shape.
    pub fn empty(num_users: usize, num_items: usize) -> Self {
        InteractionMatrix {
            num_users,
            num_items,
            user_pointers: vec![0; num_users + 1],
            item_ids: Vec::new(),
        }
    }

    /// Items observed for `user_id`, or an empty slice when out of range.
    pub fn row(&self, user_id: UserId) -> &[ItemId] {
        if user_id >= self.num_users {
            return &[];
        }

        &self.item_ids[self.user_pointers[user_id]..self.user_pointers[user_id + 1]]
    }

    /// Whether `(user_id, item_id)` is a stored entry.
    pub fn contains(&self, user_id: UserId, item_id: ItemId) -> bool {
        self.row(user_id).binary_search(&item_id).is_ok()
    }

    /// Iterate over all rows, including empty ones.
    pub fn iter_users(&self) -> InteractionMatrixUserIterator {
        InteractionMatrixUserIterator {
            interactions: self,
            idx: 0,
        }
    }

    /// All stored entries in row-major order.
    pub fn pairs(&self) -> Vec<(UserId, ItemId)> {
        self.iter_users()
            .flat_map(|user| {
                let user_id = user.user_id;
                user.item_ids.iter().map(move |&item_id| (user_id, item_id))
            })
            .collect()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether there are no stored entries.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Number of rows.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of columns.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// Iterator over the rows of an [`InteractionMatrix`].
pub struct InteractionMatrixUserIterator<'a> {
    interactions: &'a InteractionMatrix,
    idx: usize,
}

/// One row of an [`InteractionMatrix`].
#[derive(Debug)]
pub struct InteractionRow<'a> {
    /// Row index.
    pub user_id: UserId,
    /// Sorted item indices in the row.
    pub item_ids: &'a [ItemId],
}

impl<'a> Iterator for InteractionMatrixUserIterator<'a> {
    type Item = InteractionRow<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = if self.idx >= self.interactions.num_users {
            None
        } else {
            Some(InteractionRow {
                user_id: self.idx,
                item_ids: self.interactions.row(self.idx),
            })
        };

        self.idx += 1;

        value
    }
}

/// An interaction matrix together with the id mappings that produced it.
#[derive(Clone, Debug)]
pub struct Interactions {
    users: IdMap,
    items: IdMap,
    matrix: InteractionMatrix,
}

impl Interactions {
    /// Build interactions from a log, taking the user and item universes
    /// from the log itself.
    pub fn from_log(log: &[LogRecord]) -> Self {
        let users = IdMap::new(log.iter().map(|record| record.user_id));
        let items = IdMap::new(log.iter().map(|record| record.item_id));

        Self::with_universe(log, users, items)
    }

    /// Build interactions over a fixed universe of users and items, such as
    /// the full catalog. Log records referencing unknown ids are dropped.
    pub fn with_universe(log: &[LogRecord], users: IdMap, items: IdMap) -> Self {
        let pairs: Vec<(UserId, ItemId)> = log
            .iter()
            .filter_map(|record| {
                match (users.index_of(record.user_id), items.index_of(record.item_id)) {
                    (Some(user_id), Some(item_id)) => Some((user_id, item_id)),
                    _ => None,
                }
            })
            .collect();

        // Indices come from the maps themselves, so they are in bounds.
        let matrix = InteractionMatrix::from_pairs(users.len(), items.len(), &pairs)
            .unwrap_or_else(|_| InteractionMatrix::empty(users.len(), items.len()));

        Interactions {
            users,
            items,
            matrix,
        }
    }

    /// The user id mapping.
    pub fn users(&self) -> &IdMap {
        &self.users
    }

    /// The item id mapping.
    pub fn items(&self) -> &IdMap {
        &self.items
    }

    /// The interaction matrix.
    pub fn matrix(&self) -> &InteractionMatrix {
        &self.matrix
    }

    /// Translate external item ids into dense indices, dropping unknown ids.
    pub fn item_indices(&self, ids: &[ExternalId]) -> Vec<ItemId> {
        ids.iter().filter_map(|&id| self.items.index_of(id)).collect()
    }
}

/// Split a matrix into train and test halves of the same shape.
///
/// Each stored entry lands in the test half with probability
/// `test_fraction`, decided by a keyed hash of `(user, item)`; the keys are
/// drawn from `rng`, so a seeded `rng` gives a reproducible split.
pub fn train_test_split<R: Rng>(
    interactions: &InteractionMatrix,
    rng: &mut R,
    test_fraction: f32,
) -> (InteractionMatrix, InteractionMatrix) {
    let denominator = 100_000;
    let test_cutoff = (test_fraction.max(0.0).min(1.0) * denominator as f32) as u64;

    let (key_0, key_1) = (rng.gen::<u64>(), rng.gen::<u64>());

    let is_test = |user_id: UserId, item_id: ItemId| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(user_id);
        hasher.write_usize(item_id);
        hasher.finish() % denominator < test_cutoff
    };

    let (test, train): (Vec<_>, Vec<_>) = interactions
        .pairs()
        .into_iter()
        .partition(|&(user_id, item_id)| is_test(user_id, item_id));

    let (num_users, num_items) = interactions.shape();

    // Pairs come from a matrix of this shape, so they are in bounds.
    let build = |pairs: &[(UserId, ItemId)]| {
        InteractionMatrix::from_pairs(num_users, num_items, pairs)
            .unwrap_or_else(|_| InteractionMatrix::empty(num_users, num_items))
    };

    (build(&train), build(&test))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;

    fn log() -> Vec<LogRecord> {
        vec![
            LogRecord::new(30, 500),
            LogRecord::new(10, 700),
            LogRecord::new(10, 500),
            LogRecord::new(20, 900),
            LogRecord::new(10, 500),
        ]
    }

    #[test]
    fn ids_are_remapped_by_sorted_position() {
        let interactions = Interactions::from_log(&log());

        assert_eq!(interactions.users().index_of(10), Some(0));
        assert_eq!(interactions.users().index_of(30), Some(2));
        assert_eq!(interactions.items().index_of(500), Some(0));
        assert_eq!(interactions.items().index_of(900), Some(2));
        assert_eq!(interactions.items().id_at(1), Some(700));

        let matrix = interactions.matrix();
        assert_eq!(matrix.shape(), (3, 3));
        // The duplicate (10, 500) collapses into one entry.
        assert_eq!(matrix.nnz(), 4);
        assert_eq!(matrix.row(0), &[0, 1]);
        assert!(matrix.contains(2, 0));
        assert!(!matrix.contains(1, 0));
    }

    #[test]
    fn universe_keeps_unseen_ids_and_drops_unknown_records() {
        let users = IdMap::new(vec![10, 20, 30, 40]);
        let items = IdMap::new(vec![500, 700]);
        let interactions = Interactions::with_universe(&log(), users, items);

        assert_eq!(interactions.matrix().shape(), (4, 2));
        assert_eq!(interactions.matrix().nnz(), 3);
        assert!(interactions.matrix().row(3).is_empty());
        assert_eq!(interactions.item_indices(&[700, 900, 500]), vec![1, 0]);
    }

    #[test]
    fn out_of_range_pairs_are_rejected() {
        let result = InteractionMatrix::from_pairs(2, 2, &[(0, 0), (1, 2)]);

        match result {
            Err(RecommendError::InvalidShape { expected, .. }) => assert_eq!(expected, (2, 2)),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn split_preserves_shape_and_partitions_entries() {
        let pairs: Vec<_> = iproduct!(0..20, 0..30)
            .filter(|&(u, i)| (u * 7 + i * 3) % 4 == 0)
            .collect();
        let matrix = InteractionMatrix::from_pairs(20, 30, &pairs).unwrap();

        let mut rng = XorShiftRng::seed_from_u64(42);
        let (train, test) = train_test_split(&matrix, &mut rng, 0.2);

        assert_eq!(train.shape(), matrix.shape());
        assert_eq!(test.shape(), matrix.shape());
        assert_eq!(train.nnz() + test.nnz(), matrix.nnz());
        assert!(test.nnz() > 0);
        assert!(train.nnz() > test.nnz());

        for (user_id, item_id) in test.pairs() {
            assert!(!train.contains(user_id, item_id));
            assert!(matrix.contains(user_id, item_id));
        }
    }

    #[test]
    fn zero_fraction_gives_empty_test_set() {
        let matrix =
            InteractionMatrix::from_pairs(3, 5, &[(0, 0), (0, 1), (1, 2), (2, 4)]).unwrap();
        let mut rng = XorShiftRng::seed_from_u64(7);
        let (train, test) = train_test_split(&matrix, &mut rng, 0.0);

        assert_eq!(train, matrix);
        assert!(test.is_empty());
    }
}
