//! Threshold secret sharing of a 32-byte secret over the P-256 scalar field.
//!
//! A secret split with parameters `(n, t)` yields `n` shards of which any `t`
//! reconstruct the secret and any `t - 1` reveal nothing. The arithmetic runs
//! over the P-256 scalar field rather than GF(256) for interoperability with
//! the Keeper counterpart; shard indices are small nonzero field elements but
//! nothing in the math requires that.
//!
//! Splitting is **deterministic**: the polynomial coefficients are drawn from
//! a ChaCha20 stream seeded by a BLAKE3 key derivation over the secret and the
//! split parameters. Re-splitting the same secret therefore reproduces the
//! same shard set, so a Keeper observes a stable shard across the periodic
//! redistribution ticks and across process restarts.

use p256::Scalar;
use p256::elliptic_curve::{Field as _, PrimeField as _};
use rand::SeedableRng as _;
use rand_chacha::ChaCha20Rng;
use subtle::ConstantTimeEq as _;
use zeroize::Zeroize as _;

use crate::material::{KeyShard, SECRET_LEN, ShardSecret, ShareIndex};

/// Domain separator for the coefficient stream.
const POLY_SEED_CONTEXT: &str = "nexus-core shamir polynomial coefficients v1";

/// Errors of [`split`], [`recover`] and [`self_check`].
#[derive(Debug, thiserror::Error)]
pub enum ShamirError {
    /// The split parameters do not satisfy `1 <= t < n`.
    #[error("invalid split parameters: n={n}, t={t} (need 1 <= t < n)")]
    BadParameters {
        /// Total number of shards.
        n: u8,
        /// Reconstruction threshold.
        t: u8,
    },
    /// The secret bytes are not the canonical encoding of a P-256 scalar.
    ///
    /// Root keys are generated as field scalars, so hitting this indicates a
    /// programmer error rather than a runtime condition.
    #[error("secret bytes do not decode to a P-256 scalar")]
    NotAScalar,
    /// Fewer distinct shards than the threshold were provided.
    #[error("need {expected} distinct shards to recover, got {got}")]
    InsufficientShares {
        /// The reconstruction threshold.
        expected: u8,
        /// The number of distinct shards provided.
        got: usize,
    },
    /// A shard secret failed to decode to a field scalar.
    #[error("shard {index} does not decode to a P-256 scalar")]
    BadShare {
        /// The index of the offending shard.
        index: u8,
    },
    /// The shards reconstructed a different secret than the one split.
    #[error("reconstructed secret does not match the split input")]
    SelfCheckFailed,
}

/// Splits `secret` into `n` shards with reconstruction threshold `t`.
///
/// Shard `i` (for `i` in `1..=n`) is the evaluation of a degree `t - 1`
/// polynomial at `x = i`, with the secret as the constant term. The
/// coefficients are derived deterministically from the secret (see the module
/// docs), so the same inputs always produce the same shards.
///
/// # Errors
///
/// Returns [`ShamirError::BadParameters`] unless `1 <= t < n` and
/// [`ShamirError::NotAScalar`] if the secret bytes are not a canonical scalar
/// encoding.
pub fn split(secret: &[u8; SECRET_LEN], n: u8, t: u8) -> Result<Vec<KeyShard>, ShamirError> {
    if t < 1 || t >= n {
        return Err(ShamirError::BadParameters { n, t });
    }
    let constant = decode_scalar(secret).ok_or(ShamirError::NotAScalar)?;

    let mut rng = coefficient_rng(secret, n, t);
    let mut coefficients = Vec::with_capacity(usize::from(t));
    coefficients.push(constant);
    for _ in 1..t {
        coefficients.push(Scalar::random(&mut rng));
    }

    let shards = (1..=n)
        .map(|i| {
            let y = evaluate(&coefficients, Scalar::from(u64::from(i)));
            let bytes: [u8; SECRET_LEN] = y.to_repr().into();
            KeyShard {
                index: ShareIndex::new(i).expect("index range starts at 1"),
                secret: ShardSecret::from_bytes(bytes),
            }
        })
        .collect();

    for coefficient in coefficients.iter_mut() {
        coefficient.zeroize();
    }
    Ok(shards)
}

/// Recovers the secret from at least `t` distinct shards.
///
/// Extra shards and repeated indices are ignored; the first `t` distinct
/// shards (in the provided order) are interpolated at `x = 0`.
///
/// # Errors
///
/// Returns [`ShamirError::InsufficientShares`] when fewer than `t` distinct
/// indices are present and [`ShamirError::BadShare`] when a shard secret does
/// not decode.
pub fn recover(shards: &[KeyShard], t: u8) -> Result<[u8; SECRET_LEN], ShamirError> {
    let mut points: Vec<(Scalar, Scalar)> = Vec::with_capacity(usize::from(t));
    let mut seen: Vec<ShareIndex> = Vec::with_capacity(usize::from(t));
    for shard in shards {
        if seen.contains(&shard.index) {
            continue;
        }
        let y = decode_scalar(shard.secret.as_bytes()).ok_or(ShamirError::BadShare {
            index: shard.index.get(),
        })?;
        seen.push(shard.index);
        points.push((Scalar::from(u64::from(shard.index.get())), y));
        if points.len() == usize::from(t) {
            break;
        }
    }
    if points.len() < usize::from(t) {
        return Err(ShamirError::InsufficientShares {
            expected: t,
            got: points.len(),
        });
    }

    let mut secret = Scalar::ZERO;
    for (i, (x_i, y_i)) in points.iter().enumerate() {
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;
        for (j, (x_j, _)) in points.iter().enumerate() {
            if i != j {
                numerator *= x_j;
                denominator *= x_j - x_i;
            }
        }
        let inverse = Option::<Scalar>::from(denominator.invert())
            .expect("share indices are distinct, denominator is nonzero");
        secret += *y_i * numerator * inverse;
    }

    let bytes: [u8; SECRET_LEN] = secret.to_repr().into();
    secret.zeroize();
    Ok(bytes)
}

/// Verifies that the first `t` of `shards` reconstruct `secret`.
///
/// Run after every split and before any shard leaves the process; a failure
/// here means the split produced garbage and distributing it would make the
/// secret unrecoverable. Callers in bootstrap context treat the error as
/// fatal.
pub fn self_check(
    secret: &[u8; SECRET_LEN],
    shards: &[KeyShard],
    t: u8,
) -> Result<(), ShamirError> {
    let mut reconstructed = recover(shards, t)?;
    let matches: bool = reconstructed.ct_eq(secret).into();
    reconstructed.zeroize();
    if matches {
        Ok(())
    } else {
        Err(ShamirError::SelfCheckFailed)
    }
}

// Horner evaluation; coefficients are ordered constant term first.
fn evaluate(coefficients: &[Scalar], x: Scalar) -> Scalar {
    let mut acc = Scalar::ZERO;
    for coefficient in coefficients.iter().rev() {
        acc = acc * x + coefficient;
    }
    acc
}

fn decode_scalar(bytes: &[u8; SECRET_LEN]) -> Option<Scalar> {
    Option::<Scalar>::from(Scalar::from_repr((*bytes).into()))
}

fn coefficient_rng(secret: &[u8; SECRET_LEN], n: u8, t: u8) -> ChaCha20Rng {
    let mut hasher = blake3::Hasher::new_derive_key(POLY_SEED_CONTEXT);
    hasher.update(secret);
    hasher.update(&[n, t]);
    ChaCha20Rng::from_seed(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::RootKey;

    fn fresh_secret() -> [u8; SECRET_LEN] {
        *RootKey::generate(&mut rand::thread_rng()).as_bytes()
    }

    #[test]
    fn any_t_of_n_reconstructs() {
        for n in 2..=5u8 {
            for t in 1..n {
                let secret = fresh_secret();
                let shards = split(&secret, n, t).unwrap();
                assert_eq!(shards.len(), usize::from(n));
                // every contiguous window of size t works
                for start in 0..=(usize::from(n) - usize::from(t)) {
                    let subset = &shards[start..start + usize::from(t)];
                    assert_eq!(recover(subset, t).unwrap(), secret, "n={n} t={t}");
                }
                // so does a reversed selection
                let mut reversed = shards.clone();
                reversed.reverse();
                assert_eq!(recover(&reversed, t).unwrap(), secret);
            }
        }
    }

    #[test]
    fn fewer_than_t_shards_fail() {
        let secret = fresh_secret();
        let shards = split(&secret, 5, 3).unwrap();
        for count in 0..3usize {
            let err = recover(&shards[..count], 3).unwrap_err();
            assert!(matches!(
                err,
                ShamirError::InsufficientShares { expected: 3, got } if got == count
            ));
        }
    }

    #[test]
    fn duplicate_indices_do_not_count_towards_threshold() {
        let secret = fresh_secret();
        let shards = split(&secret, 3, 2).unwrap();
        let duplicated = vec![shards[0].clone(), shards[0].clone()];
        assert!(matches!(
            recover(&duplicated, 2),
            Err(ShamirError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn split_is_deterministic() {
        let secret = fresh_secret();
        let first = split(&secret, 3, 2).unwrap();
        let second = split(&secret, 3, 2).unwrap();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.index, b.index);
            assert!(a.secret.ct_eq(&b.secret));
        }
        // different parameters re-seed the polynomial
        let wider = split(&secret, 4, 2).unwrap();
        assert!(!wider[0].secret.ct_eq(&first[0].secret));
    }

    #[test]
    fn self_check_detects_a_corrupted_shard() {
        let secret = fresh_secret();
        let mut shards = split(&secret, 3, 2).unwrap();
        self_check(&secret, &shards, 2).unwrap();

        let mut corrupted = *shards[0].secret.as_bytes();
        corrupted[31] ^= 0x01;
        shards[0].secret = ShardSecret::from_bytes(corrupted);
        assert!(matches!(
            self_check(&secret, &shards, 2),
            Err(ShamirError::SelfCheckFailed)
        ));
    }

    #[test]
    fn non_scalar_shard_is_a_bad_share() {
        let secret = fresh_secret();
        let mut shards = split(&secret, 3, 2).unwrap();
        // 0xff..ff exceeds the P-256 group order
        shards[1].secret = ShardSecret::from_bytes([0xff; SECRET_LEN]);
        assert!(matches!(
            recover(&shards[..2], 2),
            Err(ShamirError::BadShare { index: 2 })
        ));
    }

    #[test]
    fn parameter_bounds_are_enforced() {
        let secret = fresh_secret();
        assert!(matches!(
            split(&secret, 3, 0),
            Err(ShamirError::BadParameters { .. })
        ));
        assert!(matches!(
            split(&secret, 3, 3),
            Err(ShamirError::BadParameters { .. })
        ));
    }
}
