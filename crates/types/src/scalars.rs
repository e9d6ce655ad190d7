//! Canonical scalar types and integer helpers
//!
//! All accounting uses integer math on `u128` token amounts. No floating
//! point is allowed anywhere in balance or weight computation.

/// Token amount in base units (1 token = 10^18 base units, ERC-20 style)
pub type TokenAmount = u128;

/// NFT lock identifier, monotonically increasing from 1
pub type LockId = u64;

/// Weekly epoch number since genesis
pub type Epoch = u64;

/// Wall-clock timestamp in seconds
pub type Timestamp = u64;

/// Account address (32-byte, hash-derived)
pub type Address = [u8; 32];

/// Liquidity pool / gauge identifier (32-byte, hash-derived)
pub type PoolId = [u8; 32];

/// Safe multiplication followed by division using checked u128 intermediate.
/// Returns None if the divisor is zero or the product overflows.
#[inline]
pub fn mul_div_u128(n: u128, mul: u128, div: u128) -> Option<u128> {
    if div == 0 {
        return None;
    }
    n.checked_mul(mul).map(|product| product / div)
}

/// Derive a deterministic pool id from a label.
/// `pool_id = BLAKE3("POOL" || label)`
pub fn pool_id(label: &str) -> PoolId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"POOL");
    hasher.update(label.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Derive a deterministic account address from a label.
/// `address = BLAKE3("ACCOUNT" || label)`
pub fn address_of(label: &str) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"ACCOUNT");
    hasher.update(label.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Short hex rendering of a 32-byte id for log fields
pub fn short_id(id: &[u8; 32]) -> String {
    hex::encode(&id[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_truncates() {
        assert_eq!(mul_div_u128(10, 1, 3), Some(3));
        assert_eq!(mul_div_u128(100, 50, 100), Some(50));
        assert_eq!(mul_div_u128(7, 0, 5), Some(0));
    }

    #[test]
    fn test_mul_div_zero_divisor() {
        assert_eq!(mul_div_u128(10, 2, 0), None);
    }

    #[test]
    fn test_pool_id_determinism() {
        assert_eq!(pool_id("usdc/weth"), pool_id("usdc/weth"));
        assert_ne!(pool_id("usdc/weth"), pool_id("usdc/wbtc"));
        assert_ne!(pool_id("alice"), address_of("alice"));
    }
}
