use crate::error::JobError;
use crate::manifest::ImageRecord;

/// The records assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub records: Vec<ImageRecord>,
}

impl Shard {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Splits `records` into `workers` strided shards:
/// `shard[k] = records[k], records[k + n], records[k + 2n], ...`.
///
/// Always returns exactly `workers` shards; when there are fewer records than
/// workers the trailing shards are empty.
pub fn partition(records: &[ImageRecord], workers: usize) -> Result<Vec<Shard>, JobError> {
    if workers == 0 {
        return Err(JobError::NoDevices);
    }

    let mut shards: Vec<Shard> = (0..workers)
        .map(|index| Shard {
            index,
            records: Vec::with_capacity(records.len() / workers + 1),
        })
        .collect();

    for (i, record) in records.iter().enumerate() {
        shards[i % workers].records.push(record.clone());
    }

    Ok(shards)
}

/// Reads shards back in round-robin order, reconstructing the original list.
pub fn interleave(shards: &[Shard]) -> Vec<ImageRecord> {
    let total: usize = shards.iter().map(Shard::len).sum();
    let mut out = Vec::with_capacity(total);
    let longest = shards.iter().map(Shard::len).max().unwrap_or(0);

    for row in 0..longest {
        for shard in shards {
            if let Some(record) = shard.records.get(row) {
                out.push(record.clone());
            }
        }
    }

    out
}
