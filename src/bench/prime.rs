//! Primality primitives used by sieve workers
//!
//! Nothing in here is shared between threads: each worker owns its own
//! [`SegmentSieve`] and its base-prime cache.

/// Divisor pairs tried between two interruption checks
pub const POLL_INTERVAL: u64 = 4096;
/// Numbers sieved between two interruption checks
pub const SEGMENT_SPAN: u64 = 1 << 18;

/// Trial division over the 6k ± 1 wheel
pub fn is_prime(n: u64) -> bool {
    is_prime_polling(n, &mut 0, || false) == Some(true)
}

/// Trial division that calls `interrupted` once every [`POLL_INTERVAL`]
/// divisor pairs. `work` carries the pair count across calls, so a run of
/// cheap candidates polls as often as one expensive candidate.
///
/// Returns `None` when `interrupted` asked to give up before an answer.
pub fn is_prime_polling(
    n: u64,
    work: &mut u64,
    mut interrupted: impl FnMut() -> bool,
) -> Option<bool> {
    if n < 2 {
        return Some(false);
    }
    if n < 4 {
        return Some(true);
    }
    if n % 2 == 0 || n % 3 == 0 {
        return Some(false);
    }
    let mut i = 5u64;
    while i <= n / i {
        if n % i == 0 || n % (i + 2) == 0 {
            return Some(false);
        }
        i += 6;
        *work += 1;
        if *work >= POLL_INTERVAL {
            *work = 0;
            if interrupted() {
                return None;
            }
        }
    }
    Some(true)
}

/// Integer square root, floor(sqrt(n))
pub fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut x = (n as f64).sqrt() as u64;
    // Correct float rounding in either direction
    while x.checked_mul(x).map_or(true, |sq| sq > n) {
        x -= 1;
    }
    while (x + 1).checked_mul(x + 1).map_or(false, |sq| sq <= n) {
        x += 1;
    }
    x
}

/// Plain sieve of Eratosthenes returning all primes `<= limit`
pub fn simple_sieve(limit: u64) -> Vec<u64> {
    if limit < 2 {
        return Vec::new();
    }
    let n = limit as usize;
    let mut composite = vec![false; n + 1];
    let mut p = 2usize;
    while p * p <= n {
        if !composite[p] {
            let mut multiple = p * p;
            while multiple <= n {
                composite[multiple] = true;
                multiple += p;
            }
        }
        p += 1;
    }
    (2..=n).filter(|&i| !composite[i]).map(|i| i as u64).collect()
}

/// Worker-local segmented sieve.
///
/// Keeps a cache of base primes that grows whenever a segment reaches past
/// the square of the largest cached prime.
#[derive(Debug, Default)]
pub struct SegmentSieve {
    base_primes: Vec<u64>,
    base_limit: u64,
    segment: Vec<bool>,
}

impl SegmentSieve {
    /// Create a sieve with base primes up to `initial_base`
    pub fn new(initial_base: u64) -> Self {
        Self {
            base_primes: simple_sieve(initial_base),
            base_limit: initial_base,
            segment: Vec::new(),
        }
    }

    /// Largest value covered by the base-prime cache
    pub fn base_limit(&self) -> u64 {
        self.base_limit
    }

    fn ensure_base_primes(&mut self, limit: u64) {
        if limit > self.base_limit {
            // Grow geometrically so the cache is rebuilt only a few times per run
            let target = limit.max(self.base_limit.saturating_mul(2));
            self.base_primes = simple_sieve(target);
            self.base_limit = target;
        }
    }

    /// Count primes in `[low, high)`
    pub fn count_primes(&mut self, low: u64, high: u64) -> u64 {
        let low = low.max(2);
        if high <= low {
            return 0;
        }
        let limit = isqrt(high - 1);
        self.ensure_base_primes(limit);

        let size = (high - low) as usize;
        self.segment.clear();
        self.segment.resize(size, true);

        for &p in &self.base_primes {
            if p > limit {
                break;
            }
            // First multiple of p inside the segment that is not p itself
            let Some(mut first) = low.div_ceil(p).checked_mul(p) else {
                continue;
            };
            if first == p {
                first += p;
            }
            let mut index = (first - low) as usize;
            while index < size {
                self.segment[index] = false;
                index += p as usize;
            }
        }

        self.segment.iter().filter(|&&is_prime| is_prime).count() as u64
    }

    /// Count primes in `[low, high)` one [`SEGMENT_SPAN`] at a time, calling
    /// `interrupted` between spans. Returns the count and the end of the
    /// prefix that was covered.
    pub fn count_primes_polling(
        &mut self,
        low: u64,
        high: u64,
        mut interrupted: impl FnMut() -> bool,
    ) -> (u64, u64) {
        let mut count = 0;
        let mut covered = low;
        while covered < high {
            let end = high.min(covered.saturating_add(SEGMENT_SPAN));
            count += self.count_primes(covered, end);
            covered = end;
            if covered < high && interrupted() {
                break;
            }
        }
        (count, covered)
    }
}
