//! The prime computations executed by the worker processes.
//!
//! These are plain functions with no shared state, so any worker can call them.

/// returns true if `n` is prime. Numbers below 2 are never prime.
pub fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    // candidates are 6k-1 and 6k+1
    let mut k: i64 = 5;
    while k <= n / k {
        if n % k == 0 || n % (k + 2) == 0 {
            return false;
        }
        k += 6;
    }
    true
}

/// all primes in the closed interval `[start, end]`, in ascending order.
/// Empty when `start > end`.
pub fn primes_in_range(start: i64, end: i64) -> Vec<i64> {
    candidates(start, end).filter(|&n| is_prime(n)).collect()
}

/// the number of primes in the closed interval `[start, end]`
pub fn count_primes(start: i64, end: i64) -> u64 {
    candidates(start, end).filter(|&n| is_prime(n)).count() as u64
}

// nothing below 2 can be prime
fn candidates(start: i64, end: i64) -> std::ops::RangeInclusive<i64> {
    start.max(2)..=end
}
