use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use nalgebra_sparse::CsrMatrix;
use ndarray::Array1;
use polars::prelude::{CsvReader, DataType, SerReader};
use rand::Rng;
use tracing::info;

use crate::cross_validation::split_user_events;
use crate::error::{LfdaeError, Result};
use crate::random::RandomState;
use crate::Flt;

pub type UserId = u32;

/// One step's worth of data for one user.
///
/// Row `i` of `x` is the (corrupted) input whose output column `item[i]` is
/// scored against `y[i]`. Group and venue ids describe the user's context and
/// are not aligned with the rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub x: CsrMatrix<Flt>,
    pub y: Array1<Flt>,
    pub item: Vec<usize>,
    pub group_id: Vec<usize>,
    pub venue_id: Vec<usize>,
}

impl TrainingSample {
    /// `(row, column)` pairs selecting the outputs the loss is computed on.
    pub fn gather_indices(&self) -> Vec<(usize, usize)> {
        (0..self.y.len()).zip(self.item.iter().copied()).collect()
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// What training and evaluation need from the interaction data, whatever its
/// storage.
pub trait InteractionSource {
    fn n_events(&self) -> usize;
    fn n_groups(&self) -> usize;
    fn n_venues(&self) -> usize;

    /// Users to train on.
    fn list_users(&self) -> Vec<UserId>;
    fn list_test_users(&self) -> Vec<UserId>;
    fn list_train_users(&self) -> HashSet<UserId>;

    /// A sample with `negative_count` negatives per positive and a fraction
    /// `corruption_ratio` of the input dropped. `(0, 0.0)` yields the full
    /// uncorrupted input with only positive targets.
    fn get_user_train_sample(
        &mut self,
        user: UserId,
        negative_count: usize,
        corruption_ratio: Flt,
    ) -> Result<TrainingSample>;

    /// Event indices held out for testing.
    fn get_user_test_event_indices(&self, user: UserId) -> Result<Vec<usize>>;
}

/// One row of the raw event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub user: UserId,
    pub event: u32,
    pub group: u32,
    pub venue: u32,
}

/// In-memory event log with a per-user train/test split.
pub struct EventData {
    n_events: usize,
    n_groups: usize,
    n_venues: usize,
    event_group: Vec<usize>,
    event_venue: Vec<usize>,
    train: BTreeMap<UserId, Vec<usize>>,
    test: BTreeMap<UserId, Vec<usize>>,
    random_state: RandomState,
}

impl EventData {
    /// Compacts raw ids to dense indices in first-seen order, then holds out
    /// `test_fraction` of each user's distinct events.
    pub fn from_records(
        records: &[EventRecord],
        test_fraction: f64,
        mut random_state: RandomState,
    ) -> Result<EventData> {
        let mut events = HashMap::new();
        let mut groups = HashMap::new();
        let mut venues = HashMap::new();
        let mut event_group = Vec::new();
        let mut event_venue = Vec::new();
        let mut user_events: BTreeMap<UserId, Vec<usize>> = BTreeMap::new();
        let mut seen = HashSet::new();

        for record in records {
            let event = intern(&mut events, record.event);
            if event == event_group.len() {
                event_group.push(intern(&mut groups, record.group));
                event_venue.push(intern(&mut venues, record.venue));
            }
            if seen.insert((record.user, event)) {
                user_events.entry(record.user).or_default().push(event);
            }
        }

        let (train, test) = split_user_events(&user_events, test_fraction, &mut random_state)?;
        let data = EventData {
            n_events: events.len(),
            n_groups: groups.len(),
            n_venues: venues.len(),
            event_group,
            event_venue,
            train,
            test,
            random_state,
        };
        info!(
            records = records.len(),
            users = data.train.len(),
            test_users = data.test.len(),
            events = data.n_events,
            groups = data.n_groups,
            venues = data.n_venues,
            "loaded event data"
        );
        Ok(data)
    }

    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        test_fraction: f64,
        random_state: RandomState,
    ) -> Result<EventData> {
        let records = load_event_csv(path)?;
        EventData::from_records(&records, test_fraction, random_state)
    }

    pub fn user_train_events(&self, user: UserId) -> Option<&[usize]> {
        self.train.get(&user).map(Vec::as_slice)
    }

    fn sample_negatives(&mut self, positives: &[usize], count: usize) -> Vec<usize> {
        if count == 0 || positives.len() >= self.n_events {
            return Vec::new();
        }
        let excluded: HashSet<usize> = positives.iter().copied().collect();
        let n_events = self.n_events;
        let rng = self.random_state.rng();
        (0..count)
            .map(|_| loop {
                let candidate = rng.gen_range(0..n_events);
                if !excluded.contains(&candidate) {
                    break candidate;
                }
            })
            .collect()
    }
}

impl InteractionSource for EventData {
    fn n_events(&self) -> usize {
        self.n_events
    }

    fn n_groups(&self) -> usize {
        self.n_groups
    }

    fn n_venues(&self) -> usize {
        self.n_venues
    }

    fn list_users(&self) -> Vec<UserId> {
        self.train.keys().copied().collect()
    }

    fn list_test_users(&self) -> Vec<UserId> {
        self.test.keys().copied().collect()
    }

    fn list_train_users(&self) -> HashSet<UserId> {
        self.train.keys().copied().collect()
    }

    fn get_user_train_sample(
        &mut self,
        user: UserId,
        negative_count: usize,
        corruption_ratio: Flt,
    ) -> Result<TrainingSample> {
        if !(0.0..=1.0).contains(&corruption_ratio) {
            return Err(LfdaeError::Config(format!(
                "corruption ratio must lie in [0, 1], got {}",
                corruption_ratio
            )));
        }
        let positives = self
            .train
            .get(&user)
            .cloned()
            .ok_or(LfdaeError::UnknownUser(user))?;

        let mut input = positives.clone();
        let dropped = (positives.len() as Flt * corruption_ratio).floor() as usize;
        if dropped > 0 {
            self.random_state.shuffle(&mut input)?;
            input.truncate(input.len() - dropped);
        }

        let n_negatives = negative_count.checked_mul(positives.len()).ok_or_else(|| {
            LfdaeError::Config(format!(
                "{} negatives per positive overflows for {} positives",
                negative_count,
                positives.len()
            ))
        })?;
        let negatives = self.sample_negatives(&positives, n_negatives);
        let y = positives
            .iter()
            .map(|_| 1.0)
            .chain(negatives.iter().map(|_| 0.0))
            .collect::<Array1<Flt>>();
        let item = positives
            .iter()
            .chain(negatives.iter())
            .copied()
            .collect::<Vec<usize>>();

        Ok(TrainingSample {
            x: binary_rows(self.n_events, &input, item.len())?,
            y,
            item,
            group_id: positives.iter().map(|&e| self.event_group[e]).collect(),
            venue_id: positives.iter().map(|&e| self.event_venue[e]).collect(),
        })
    }

    fn get_user_test_event_indices(&self, user: UserId) -> Result<Vec<usize>> {
        self.test
            .get(&user)
            .cloned()
            .ok_or(LfdaeError::UnknownUser(user))
    }
}

fn intern(index: &mut HashMap<u32, usize>, raw: u32) -> usize {
    let next = index.len();
    *index.entry(raw).or_insert(next)
}

/// Reads a `user,event,group,venue` CSV with a header row.
pub fn load_event_csv<P: AsRef<Path>>(path: P) -> Result<Vec<EventRecord>> {
    let data_type = vec![DataType::UInt32; 4];
    let df = CsvReader::from_path(path.as_ref())?
        .has_header(true)
        .with_projection(Some(vec![0, 1, 2, 3]))
        .with_dtypes_slice(Some(&data_type))
        .finish()?;

    let users = df[0].u32()?;
    let events = df[1].u32()?;
    let groups = df[2].u32()?;
    let venues = df[3].u32()?;

    let mut records = Vec::with_capacity(df.height());
    for (row, (((user, event), group), venue)) in users
        .into_iter()
        .zip(events.into_iter())
        .zip(groups.into_iter())
        .zip(venues.into_iter())
        .enumerate()
    {
        match (user, event, group, venue) {
            (Some(user), Some(event), Some(group), Some(venue)) => records.push(EventRecord {
                user,
                event,
                group,
                venue,
            }),
            _ => {
                return Err(LfdaeError::Config(format!(
                    "{}: missing value on data row {}",
                    path.as_ref().display(),
                    row + 1
                )))
            }
        }
    }
    Ok(records)
}

/// `times` identical rows with a 1.0 at every index in `active`.
pub fn binary_rows(n_cols: usize, active: &[usize], times: usize) -> Result<CsrMatrix<Flt>> {
    let mut indices = active.to_vec();
    indices.sort_unstable();
    indices.dedup();
    let values = vec![1.0; indices.len()];
    tile_row(n_cols, &indices, &values, times)
}

/// `times` copies of row `row` of `x`.
pub fn repeat_row(x: &CsrMatrix<Flt>, row: usize, times: usize) -> Result<CsrMatrix<Flt>> {
    let source = x.get_row(row).ok_or(LfdaeError::IndexOutOfRange {
        what: "input row",
        index: row,
        size: x.nrows(),
    })?;
    tile_row(x.ncols(), source.col_indices(), source.values(), times)
}

fn tile_row(
    n_cols: usize,
    col_indices: &[usize],
    values: &[Flt],
    times: usize,
) -> Result<CsrMatrix<Flt>> {
    let nnz = col_indices.len();
    CsrMatrix::try_from_csr_data(
        times,
        n_cols,
        (0..=times).map(|r| r * nnz).collect(),
        col_indices.repeat(times),
        values.repeat(times),
    )
    .map_err(|e| LfdaeError::Sparse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn records(rows: &[(u32, u32, u32, u32)]) -> Vec<EventRecord> {
        rows.iter()
            .map(|&(user, event, group, venue)| EventRecord {
                user,
                event,
                group,
                venue,
            })
            .collect()
    }

    fn small_data(test_fraction: f64) -> EventData {
        let rows = [
            (1, 100, 7, 70),
            (1, 101, 7, 71),
            (1, 102, 8, 70),
            (1, 103, 8, 72),
            (2, 100, 7, 70),
            (2, 104, 9, 73),
            (3, 105, 9, 73),
            (3, 100, 7, 70),
            (3, 100, 7, 70),
        ];
        EventData::from_records(&records(&rows), test_fraction, RandomState::new(Some(11))).unwrap()
    }

    #[test]
    fn test_ids_are_compacted() {
        let data = small_data(0.0);
        assert_eq!(data.n_events(), 6);
        assert_eq!(data.n_groups(), 3);
        assert_eq!(data.n_venues(), 4);
        assert_eq!(data.list_users(), vec![1, 2, 3]);
        // duplicate (user, event) rows collapse
        assert_eq!(data.user_train_events(3).unwrap().len(), 2);
        assert!(data.list_test_users().is_empty());
    }

    #[test]
    fn test_uncorrupted_sample_is_full_positive_set() {
        let mut data = small_data(0.0);
        let sample = data.get_user_train_sample(1, 0, 0.0).unwrap();
        let mut positives = data.user_train_events(1).unwrap().to_vec();
        assert_eq!(sample.item, positives);
        assert!(sample.y.iter().all(|&v| v == 1.0));
        assert_eq!(sample.x.nrows(), 4);
        assert_eq!(sample.x.ncols(), 6);
        positives.sort_unstable();
        for row in sample.x.row_iter() {
            assert_eq!(row.col_indices(), positives.as_slice());
        }
        assert_eq!(sample.group_id, vec![0, 0, 1, 1]);
        assert_eq!(sample.venue_id, vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_corruption_and_negatives() {
        let mut data = small_data(0.0);
        let sample = data.get_user_train_sample(1, 2, 0.5).unwrap();
        let positives = data.user_train_events(1).unwrap().to_vec();

        assert_eq!(sample.len(), 4 + 8);
        assert_eq!(sample.x.nrows(), sample.len());
        assert_eq!(sample.x.get_row(0).unwrap().nnz(), 2);
        assert_eq!(sample.y.iter().filter(|&&v| v == 0.0).count(), 8);
        for (&event, &target) in sample.item.iter().zip(sample.y.iter()) {
            assert_eq!(positives.contains(&event), target == 1.0);
        }
        assert!(sample.item.iter().all(|&e| e < data.n_events()));
    }

    #[test]
    fn test_no_negatives_when_catalog_is_exhausted() {
        let rows = [(1, 10, 1, 1), (1, 11, 1, 1)];
        let mut data =
            EventData::from_records(&records(&rows), 0.0, RandomState::new(Some(2))).unwrap();
        let sample = data.get_user_train_sample(1, 4, 0.0).unwrap();
        assert_eq!(sample.len(), 2);
    }

    #[test]
    fn test_unknown_user_and_bad_ratio() {
        let mut data = small_data(0.0);
        assert!(matches!(
            data.get_user_train_sample(42, 0, 0.0),
            Err(LfdaeError::UnknownUser(42))
        ));
        assert!(matches!(
            data.get_user_train_sample(1, 0, 1.5),
            Err(LfdaeError::Config(_))
        ));
        assert!(data.get_user_test_event_indices(42).is_err());
    }

    #[test]
    fn test_negative_count_overflow_is_config_error() {
        let mut data = small_data(0.0);
        assert!(matches!(
            data.get_user_train_sample(1, usize::MAX, 0.0),
            Err(LfdaeError::Config(_))
        ));
        assert_eq!(data.get_user_train_sample(1, 1, 0.0).unwrap().len(), 8);
    }

    #[test]
    fn test_held_out_events_leave_training_set() {
        let data = small_data(0.5);
        assert_eq!(data.list_test_users(), vec![1, 2, 3]);
        for user in data.list_test_users() {
            let test = data.get_user_test_event_indices(user).unwrap();
            let train = data.user_train_events(user).unwrap();
            assert!(!train.is_empty());
            assert!(test.iter().all(|e| !train.contains(e)));
        }
    }

    #[test]
    fn test_repeat_and_binary_rows() {
        let x = binary_rows(5, &[3, 1, 3], 2).unwrap();
        assert_eq!(x.nrows(), 2);
        assert_eq!(x.get_row(1).unwrap().col_indices(), &[1, 3]);

        let tiled = repeat_row(&x, 0, 4).unwrap();
        assert_eq!(tiled.nrows(), 4);
        assert_eq!(tiled.nnz(), 8);
        assert!(repeat_row(&x, 2, 1).is_err());
        assert!(binary_rows(3, &[5], 1).is_err());
    }

    #[test]
    fn test_load_event_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user,event,group,venue").unwrap();
        writeln!(file, "1,100,7,70").unwrap();
        writeln!(file, "2,101,7,71").unwrap();
        file.flush().unwrap();

        let records = load_event_csv(file.path()).unwrap();
        assert_eq!(
            records,
            vec![
                EventRecord { user: 1, event: 100, group: 7, venue: 70 },
                EventRecord { user: 2, event: 101, group: 7, venue: 71 },
            ]
        );
    }
}
