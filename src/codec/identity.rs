//! 身份码编解码
//!
//! 每一页四个角各印一个码。标准页码为定宽十进制串：
//!
//! ```text
//! <4位试卷号><2位页码><1位版本><1位角号><6位公开码>
//! 0007 02 1 3 123456   ->  "00070213123456"
//! ```
//!
//! 草稿纸只印 `SCRAP<角号>`，不携带试卷/页码，解码时也不需要任何上下文。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CodecError;

/// 试卷号宽度
pub const PAPER_WIDTH: usize = 4;
/// 页码宽度
pub const PAGE_WIDTH: usize = 2;
/// 版本宽度
pub const VERSION_WIDTH: usize = 1;
/// 角号宽度
pub const CORNER_WIDTH: usize = 1;
/// 公开码宽度
pub const PUBLIC_CODE_WIDTH: usize = 6;
/// 标准页码总长度
pub const PAGE_CODE_LEN: usize =
    PAPER_WIDTH + PAGE_WIDTH + VERSION_WIDTH + CORNER_WIDTH + PUBLIC_CODE_WIDTH;
/// 草稿纸标记
pub const SCRAP_MARKER: &str = "SCRAP";

/// 物理/逻辑角
///
/// 从右上角开始逆时针编号，因此页面逆时针转 90° 时，每个角的编号恰好加 1（模 4）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Corner {
    TopRight = 1,
    TopLeft = 2,
    BottomLeft = 3,
    BottomRight = 4,
}

impl Corner {
    /// 按编号排列的四个角
    pub const ALL: [Corner; 4] = [
        Corner::TopRight,
        Corner::TopLeft,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// 角号（1..=4）
    pub fn index(self) -> u8 {
        self as u8
    }

    /// 从角号解析
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Corner::TopRight),
            2 => Some(Corner::TopLeft),
            3 => Some(Corner::BottomLeft),
            4 => Some(Corner::BottomRight),
            _ => None,
        }
    }

    /// 在四元数组中的下标
    pub fn slot(self) -> usize {
        self as usize - 1
    }

    /// 页面逆时针旋转 `quarter_turns` 个 90° 之后，此角落到哪个物理角
    pub fn turned_ccw(self, quarter_turns: u8) -> Corner {
        let shifted = (self.index() - 1 + quarter_turns % 4) % 4;
        Corner::ALL[shifted as usize]
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Corner::TopRight => "右上",
            Corner::TopLeft => "左上",
            Corner::BottomLeft => "左下",
            Corner::BottomRight => "右下",
        };
        write!(f, "{}({})", name, self.index())
    }
}

/// 标准页身份码
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityCode {
    pub paper: u32,
    pub page: u32,
    pub version: u32,
    pub corner: Corner,
    pub public_code: String,
}

impl IdentityCode {
    /// 忽略角号后是否指向同一页
    pub fn same_page_as(&self, other: &IdentityCode) -> bool {
        self.paper == other.paper
            && self.page == other.page
            && self.version == other.version
            && self.public_code == other.public_code
    }
}

/// 任意一种解码结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedCode {
    /// 标准页码
    Page(IdentityCode),
    /// 草稿纸码
    Scrap { corner: Corner },
}

impl DecodedCode {
    /// 码自身记录的（逻辑）角
    pub fn corner(&self) -> Corner {
        match self {
            DecodedCode::Page(code) => code.corner,
            DecodedCode::Scrap { corner } => *corner,
        }
    }
}

/// 编码标准页码
pub fn encode(
    paper: u32,
    page: u32,
    version: u32,
    corner: Corner,
    public_code: &str,
) -> Result<String, CodecError> {
    check_width("paper", paper, PAPER_WIDTH)?;
    check_width("page", page, PAGE_WIDTH)?;
    check_width("version", version, VERSION_WIDTH)?;
    if public_code.len() != PUBLIC_CODE_WIDTH || !all_digits(public_code) {
        return Err(CodecError::FieldOverflow {
            field: "public_code",
            value: public_code.to_string(),
        });
    }

    Ok(format!(
        "{:0pw$}{:0gw$}{:0vw$}{}{}",
        paper,
        page,
        version,
        corner.index(),
        public_code,
        pw = PAPER_WIDTH,
        gw = PAGE_WIDTH,
        vw = VERSION_WIDTH,
    ))
}

/// 编码一个已有的身份码
pub fn encode_code(code: &IdentityCode) -> Result<String, CodecError> {
    encode(
        code.paper,
        code.page,
        code.version,
        code.corner,
        &code.public_code,
    )
}

/// 解码标准页码
pub fn decode(raw: &str) -> Result<IdentityCode, CodecError> {
    if raw.len() != PAGE_CODE_LEN {
        return Err(malformed(raw, "长度不正确"));
    }
    if !all_digits(raw) {
        return Err(malformed(raw, "包含非数字字符"));
    }

    // 全部是 ASCII 数字，按字节切片是安全的
    let (paper, rest) = raw.split_at(PAPER_WIDTH);
    let (page, rest) = rest.split_at(PAGE_WIDTH);
    let (version, rest) = rest.split_at(VERSION_WIDTH);
    let (corner, public_code) = rest.split_at(CORNER_WIDTH);

    let corner = parse_corner(corner).ok_or_else(|| malformed(raw, "角号必须为 1-4"))?;

    Ok(IdentityCode {
        paper: parse_digits(paper),
        page: parse_digits(page),
        version: parse_digits(version),
        corner,
        public_code: public_code.to_string(),
    })
}

/// 编码草稿纸码
pub fn encode_scrap(corner: Corner) -> String {
    format!("{}{}", SCRAP_MARKER, corner.index())
}

/// 解码草稿纸码
pub fn decode_scrap(raw: &str) -> Result<Corner, CodecError> {
    let corner = raw
        .strip_prefix(SCRAP_MARKER)
        .ok_or_else(|| malformed(raw, "缺少草稿纸标记"))?;
    if corner.len() != CORNER_WIDTH {
        return Err(malformed(raw, "长度不正确"));
    }
    parse_corner(corner).ok_or_else(|| malformed(raw, "角号必须为 1-4"))
}

/// 解码任意一种码
pub fn decode_any(raw: &str) -> Result<DecodedCode, CodecError> {
    let raw = raw.trim();
    if raw.starts_with(SCRAP_MARKER) {
        decode_scrap(raw).map(|corner| DecodedCode::Scrap { corner })
    } else {
        decode(raw).map(DecodedCode::Page)
    }
}

// ========== 内部辅助函数 ==========

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_digits(s: &str) -> u32 {
    s.bytes()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
}

fn parse_corner(s: &str) -> Option<Corner> {
    match s.as_bytes() {
        [b] if b.is_ascii_digit() => Corner::from_index(b - b'0'),
        _ => None,
    }
}

fn check_width(field: &'static str, value: u32, width: usize) -> Result<(), CodecError> {
    if value >= 10u32.pow(width as u32) {
        return Err(CodecError::FieldOverflow {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn malformed(raw: &str, reason: &'static str) -> CodecError {
    CodecError::MalformedCode {
        code: raw.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let code = encode(7, 2, 1, Corner::BottomLeft, "123456").unwrap();
        assert_eq!(code, "00070213123456");
        assert_eq!(code.len(), PAGE_CODE_LEN);
    }

    #[test]
    fn test_round_trip() {
        // 边界值 + 一些中间值
        for &(paper, page, version) in &[(1, 1, 1), (9999, 99, 9), (7, 12, 3), (0, 0, 0)] {
            for corner in Corner::ALL {
                let original = IdentityCode {
                    paper,
                    page,
                    version,
                    corner,
                    public_code: "000042".to_string(),
                };
                let decoded = decode(&encode_code(&original).unwrap()).unwrap();
                assert_eq!(decoded, original);
            }
        }
    }

    #[test]
    fn test_encode_rejects_overflow() {
        assert!(matches!(
            encode(10000, 1, 1, Corner::TopLeft, "123456"),
            Err(CodecError::FieldOverflow { field: "paper", .. })
        ));
        assert!(matches!(
            encode(1, 100, 1, Corner::TopLeft, "123456"),
            Err(CodecError::FieldOverflow { field: "page", .. })
        ));
        assert!(matches!(
            encode(1, 1, 10, Corner::TopLeft, "123456"),
            Err(CodecError::FieldOverflow { field: "version", .. })
        ));
        assert!(matches!(
            encode(1, 1, 1, Corner::TopLeft, "12a456"),
            Err(CodecError::FieldOverflow { field: "public_code", .. })
        ));
    }

    #[test]
    fn test_decode_is_total() {
        let inputs = [
            "",
            "0007021",
            "000702131234567",
            "0007021312345x",
            "00070210123456",
            "00070215123456",
            "０００７０２１３１２３４５６",
            "🦀🦀🦀🦀🦀🦀🦀",
            "SCRAP",
            "SCRAP0",
            "SCRAP12",
            "scrap1",
        ];
        for input in inputs {
            assert!(
                matches!(decode_any(input), Err(CodecError::MalformedCode { .. })),
                "输入 {:?} 应当解码失败",
                input
            );
        }
    }

    #[test]
    fn test_scrap_codes() {
        for corner in Corner::ALL {
            let raw = encode_scrap(corner);
            assert_eq!(decode_scrap(&raw).unwrap(), corner);
            assert_eq!(decode_any(&raw).unwrap(), DecodedCode::Scrap { corner });
        }
        assert_eq!(encode_scrap(Corner::BottomRight), "SCRAP4");
    }

    #[test]
    fn test_corner_turns() {
        assert_eq!(Corner::TopRight.turned_ccw(1), Corner::TopLeft);
        assert_eq!(Corner::BottomRight.turned_ccw(1), Corner::TopRight);
        assert_eq!(Corner::TopLeft.turned_ccw(2), Corner::BottomRight);
        for corner in Corner::ALL {
            assert_eq!(corner.turned_ccw(4), corner);
            assert_eq!(corner.turned_ccw(0), corner);
        }
    }
}
