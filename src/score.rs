//! 有序编码
//!
//! 后端只能按排序键做字符串范围查询，这里把分数、列表下标和流 ID 编码成
//! 定长字符串，使字典序与数值序一致。
//!
//! 解码器只处理内部生成的字符串，格式不对属于程序错误，直接 panic。

use std::fmt;
use std::str::FromStr;

use crate::error::AdapterError;

const SIGN_BIT: u64 = 1 << 63;
const HEX_WIDTH: usize = 16;
const DEC_WIDTH: usize = 20;

/// 浮点分数 -> 16 位十六进制
///
/// 正数置符号位，负数按位取反：负数整体排在正数之前，且各自保持大小顺序。
pub fn encode_score(score: f64) -> String {
    let bits = score.to_bits();
    let ordered = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    };
    format!("{:016x}", ordered)
}

/// # Panics
/// 输入不是 16 位十六进制时 panic
pub fn decode_score(encoded: &str) -> f64 {
    let ordered = parse_hex(encoded);
    let bits = if ordered & SIGN_BIT != 0 {
        ordered & !SIGN_BIT
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

/// 有符号下标 -> 16 位十六进制（偏移二进制）
pub fn encode_index(index: i64) -> String {
    format!("{:016x}", (index as u64) ^ SIGN_BIT)
}

/// # Panics
/// 输入不是 16 位十六进制时 panic
pub fn decode_index(encoded: &str) -> i64 {
    (parse_hex(encoded) ^ SIGN_BIT) as i64
}

fn parse_hex(encoded: &str) -> u64 {
    assert!(
        encoded.len() == HEX_WIDTH && encoded.bytes().all(|b| b.is_ascii_hexdigit()),
        "malformed ordered key: {:?}",
        encoded
    );
    u64::from_str_radix(encoded, 16).unwrap_or_else(|e| panic!("malformed ordered key {:?}: {}", encoded, e))
}

/// 流 ID：毫秒时间戳 + 同一毫秒内的序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// 范围扫描的开放起点（`-`）
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    /// 范围扫描的开放终点（`+`）
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// 自动生成：时间前进则用新时间戳，否则在上一个 ID 的基础上递增序号
    pub fn next_after(last: StreamId, now_ms: u64) -> Option<StreamId> {
        if now_ms > last.ms {
            Some(StreamId::new(now_ms, 0))
        } else if last.seq < u64::MAX {
            Some(StreamId::new(last.ms, last.seq + 1))
        } else {
            last.ms.checked_add(1).map(|ms| StreamId::new(ms, 0))
        }
    }

    /// 定宽零填充编码，字符串比较即时间先后
    pub fn encode(&self) -> String {
        format!("{:020}-{:020}", self.ms, self.seq)
    }

    /// # Panics
    /// 输入不是 `encode` 的输出时 panic
    pub fn decode(encoded: &str) -> StreamId {
        let parts = encoded
            .split_once('-')
            .filter(|(ms, seq)| is_fixed_decimal(ms) && is_fixed_decimal(seq));
        let Some((ms, seq)) = parts else {
            panic!("malformed stream id key: {:?}", encoded);
        };
        let parse = |s: &str| {
            s.parse::<u64>()
                .unwrap_or_else(|e| panic!("malformed stream id key {:?}: {}", encoded, e))
        };
        StreamId::new(parse(ms), parse(seq))
    }

    /// 解析 XRANGE 的边界：`-`、`+`、`<ms>` 或 `<ms>-<seq>`
    ///
    /// 只给出毫秒时，起点取该毫秒的第一个序号，终点取最后一个。
    pub fn parse_bound(s: &str, is_end: bool) -> Result<StreamId, AdapterError> {
        match s {
            "-" => Ok(StreamId::MIN),
            "+" => Ok(StreamId::MAX),
            _ if !s.contains('-') => {
                let ms = parse_u64(s)?;
                Ok(StreamId::new(ms, if is_end { u64::MAX } else { 0 }))
            }
            _ => s.parse(),
        }
    }
}

fn is_fixed_decimal(s: &str) -> bool {
    s.len() == DEC_WIDTH && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_u64(s: &str) -> Result<u64, AdapterError> {
    s.parse::<u64>()
        .map_err(|_| AdapterError::InvalidArgument(format!("Invalid stream ID specified: {}", s)))
}

impl FromStr for StreamId {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((ms, seq)) => Ok(StreamId::new(parse_u64(ms)?, parse_u64(seq)?)),
            None => Ok(StreamId::new(parse_u64(s)?, 0)),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_score_ordering_across_sign() {
        let scores = [
            f64::NEG_INFINITY,
            f64::MIN,
            -1e10,
            -1.5,
            -f64::MIN_POSITIVE,
            0.0,
            f64::MIN_POSITIVE,
            1.0,
            2.5,
            f64::MAX,
            f64::INFINITY,
        ];
        for pair in scores.windows(2) {
            assert!(
                encode_score(pair[0]) < encode_score(pair[1]),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
        for s in scores {
            assert_eq!(encode_score(s).len(), 16);
            assert_eq!(decode_score(&encode_score(s)), s);
        }
    }

    #[test]
    fn test_negative_zero_sorts_before_zero() {
        assert!(encode_score(-0.0) < encode_score(0.0));
        assert!(decode_score(&encode_score(-0.0)).is_sign_negative());
    }

    #[test]
    fn test_index_ordering() {
        let idx = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        for pair in idx.windows(2) {
            assert!(encode_index(pair[0]) < encode_index(pair[1]));
        }
        for i in idx {
            assert_eq!(decode_index(&encode_index(i)), i);
        }
    }

    #[test]
    #[should_panic(expected = "malformed ordered key")]
    fn test_decode_score_rejects_wrong_width() {
        decode_score("abc");
    }

    #[test]
    #[should_panic(expected = "malformed stream id key")]
    fn test_decode_stream_id_rejects_garbage() {
        StreamId::decode("12-34");
    }

    #[test]
    fn test_stream_id_encoding() {
        let a = StreamId::new(1_700_000_000_000, 9);
        let b = StreamId::new(1_700_000_000_000, 10);
        let c = StreamId::new(1_700_000_000_001, 0);
        assert!(a.encode() < b.encode());
        assert!(b.encode() < c.encode());
        assert!(StreamId::MIN.encode() < a.encode());
        assert!(c.encode() < StreamId::MAX.encode());
        assert_eq!(StreamId::decode(&b.encode()), b);
        assert_eq!(StreamId::decode(&StreamId::MAX.encode()), StreamId::MAX);
    }

    #[test]
    fn test_next_after() {
        let last = StreamId::new(100, 5);
        assert_eq!(StreamId::next_after(last, 200), Some(StreamId::new(200, 0)));
        // 时钟回拨时沿用上一个时间戳
        assert_eq!(StreamId::next_after(last, 50), Some(StreamId::new(100, 6)));
        assert_eq!(StreamId::next_after(StreamId::MAX, 0), None);
    }

    #[test]
    fn test_parse_user_ids() {
        assert_eq!("5-3".parse::<StreamId>().unwrap(), StreamId::new(5, 3));
        assert_eq!("5".parse::<StreamId>().unwrap(), StreamId::new(5, 0));
        assert!("x-1".parse::<StreamId>().is_err());
        assert_eq!(StreamId::parse_bound("-", false).unwrap(), StreamId::MIN);
        assert_eq!(StreamId::parse_bound("+", true).unwrap(), StreamId::MAX);
        assert_eq!(
            StreamId::parse_bound("7", true).unwrap(),
            StreamId::new(7, u64::MAX)
        );
    }

    proptest! {
        #[test]
        fn prop_score_order_preserved(a in any::<f64>(), b in any::<f64>()) {
            prop_assume!(!a.is_nan() && !b.is_nan());
            if a < b {
                prop_assert!(encode_score(a) < encode_score(b));
            } else if b < a {
                prop_assert!(encode_score(b) < encode_score(a));
            }
        }

        #[test]
        fn prop_score_round_trip(a in any::<f64>()) {
            prop_assume!(!a.is_nan());
            prop_assert_eq!(decode_score(&encode_score(a)).to_bits(), a.to_bits());
        }

        #[test]
        fn prop_stream_id_order_preserved(a in any::<(u64, u64)>(), b in any::<(u64, u64)>()) {
            let (x, y) = (StreamId::new(a.0, a.1), StreamId::new(b.0, b.1));
            prop_assert_eq!(x.cmp(&y), x.encode().cmp(&y.encode()));
        }
    }
}
