use cgrb::bench::prime::is_prime;
use cgrb::bench::SieveWorkerPool;
use cgrb::config::{PartitionPolicy, SieveConfig};

fn single_threaded_count(start: u64, end: u64) -> u64 {
    (start..end).filter(|&n| is_prime(n)).count() as u64
}

fn pool(workers: usize, partition: PartitionPolicy, start: u64) -> SieveWorkerPool {
    let config = SieveConfig::new()
        .with_worker_count(workers)
        .with_partition(partition)
        .with_start(start)
        .with_progress(false);
    SieveWorkerPool::new(config).expect("valid config")
}

#[tokio::test]
async fn test_known_prime_counts() {
    let mut chunked = pool(4, PartitionPolicy::default(), 2);
    assert_eq!(chunked.count_range(1_000_000).await.unwrap().total_primes_found, 78_498);

    let mut interleaved = pool(3, PartitionPolicy::Interleaved { check_interval: 4096 }, 2);
    assert_eq!(interleaved.count_range(100_000).await.unwrap().total_primes_found, 9_592);
}

#[tokio::test]
async fn test_coverage_is_deterministic_for_any_worker_count() {
    let start = 10_000;
    let end = 130_000;
    let reference = single_threaded_count(start, end);

    for workers in [1, 2, 3, 7, 16] {
        for partition in [
            PartitionPolicy::Chunked { chunk_size: 4_999 },
            PartitionPolicy::Interleaved { check_interval: 100 },
        ] {
            let count = pool(workers, partition, start).count_range(end).await.unwrap();
            assert_eq!(
                count.total_primes_found, reference,
                "{} workers, {:?}",
                workers, partition
            );
            assert_eq!(count.candidates_tested, end - start);
        }
    }
}

#[tokio::test]
async fn test_interleaved_workers_split_evenly() {
    let count = pool(2, PartitionPolicy::Interleaved { check_interval: 64 }, 3)
        .count_range(1_000)
        .await
        .unwrap();
    // Worker 1 only sees even numbers above 3, none of them prime
    assert_eq!(count.per_worker_primes[1], 0);
    assert_eq!(count.per_worker_primes[0], single_threaded_count(3, 1_000));
}

#[tokio::test]
async fn test_empty_range() {
    let count = pool(4, PartitionPolicy::default(), 500).count_range(500).await.unwrap();
    assert_eq!(count.total_primes_found, 0);
    assert_eq!(count.candidates_tested, 0);
}
