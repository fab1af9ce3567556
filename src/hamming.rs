use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 两个哈希的比特长度不一致，无法比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("哈希长度不一致: {0} != {1}")]
pub struct HashLengthMismatch(pub usize, pub usize);

/// 解析哈希字符串失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("无效的哈希字符: {0:?}")]
pub struct ParseHashError(pub char);

/// 定长比特串
///
/// 按写入顺序保存每一位，高位在前，最后一个字节的剩余位恒为 0。
/// 文本形式为由 `0` 和 `1` 组成的字符串，与数据库和清单文件中的格式一致。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DHash {
    bits: usize,
    data: Vec<u8>,
}

impl DHash {
    pub fn from_bits<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bits = 0;
        let mut data = vec![];
        for bit in iter {
            if bits % 8 == 0 {
                data.push(0);
            }
            if bit {
                data[bits / 8] |= 0x80 >> (bits % 8);
            }
            bits += 1;
        }
        Self { bits, data }
    }

    /// 比特长度
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn bit(&self, i: usize) -> bool {
        assert!(i < self.bits, "bit index out of range");
        self.data[i / 8] & (0x80 >> (i % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 计算汉明距离，长度不同的哈希直接报错而不是截断比较
    pub fn hamming(&self, other: &Self) -> Result<u32, HashLengthMismatch> {
        if self.bits != other.bits {
            return Err(HashLengthMismatch(self.bits, other.bits));
        }
        Ok(match self.data.len() {
            8 => hamming_64(&self.data, &other.data),
            _ => hamming_naive(&self.data, &other.data),
        })
    }
}

#[inline(always)]
pub fn hamming_naive(va: &[u8], vb: &[u8]) -> u32 {
    let mut sum = 0;
    for (a, b) in va.iter().zip(vb) {
        sum += (a ^ b).count_ones();
    }
    sum
}

/// 64 位哈希是默认情况，合并成一次异或
#[inline(always)]
pub fn hamming_64(va: &[u8], vb: &[u8]) -> u32 {
    let va = u64::from_be_bytes(va.try_into().expect("hash must be 8 bytes"));
    let vb = u64::from_be_bytes(vb.try_into().expect("hash must be 8 bytes"));
    (va ^ vb).count_ones()
}

impl fmt::Display for DHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.bits {
            f.write_str(if self.bit(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for DHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = s
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                _ => Err(ParseHashError(c)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_bits(bits))
    }
}
