//! 读码服务 - 业务能力层
//!
//! 只负责"从一张页面图像上读出四个角的码"这一能力：
//! 裁出四个角的区域，交给 `SymbolDecoder` 解码，再按码内记录的逻辑角推断旋转。
//! 不认识试卷结构，也不碰认领表。

use image::{imageops, GrayImage};
use tracing::debug;

use crate::codec::{self, Corner};
use crate::models::scan::{CornerSlots, Rotation, RotationReading};

/// 默认角区域占宽/高的比例
pub const DEFAULT_CORNER_FRACTION: f32 = 0.3;

/// 符号解码器
///
/// 输入一个角区域，返回其中解出的全部原始字符串（可能为空）。
pub trait SymbolDecoder: Send + Sync {
    fn decode_region(&self, region: &GrayImage) -> Vec<String>;
}

/// 基于 rqrr 的二维码解码器
#[derive(Debug, Default, Clone, Copy)]
pub struct QrSymbolDecoder;

impl SymbolDecoder for QrSymbolDecoder {
    fn decode_region(&self, region: &GrayImage) -> Vec<String> {
        let (width, height) = region.dimensions();
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            width as usize,
            height as usize,
            |x, y| region.get_pixel(x as u32, y as u32).0[0],
        );

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_meta, content)) => Some(content),
                Err(e) => {
                    debug!("检测到二维码但解码失败: {:?}", e);
                    None
                }
            })
            .collect()
    }
}

/// 单页读码结果
#[derive(Debug, Clone)]
pub struct PageReading {
    /// 按物理角排列
    pub slots: CornerSlots,
    pub rotation: RotationReading,
    pub diagnostics: Vec<String>,
}

impl PageReading {
    fn unreadable(diagnostic: String) -> Self {
        Self {
            slots: Default::default(),
            rotation: RotationReading::NoCodes,
            diagnostics: vec![diagnostic],
        }
    }
}

/// 读码器
pub struct CodeReader {
    decoder: Box<dyn SymbolDecoder>,
    corner_fraction: f32,
}

impl CodeReader {
    /// 使用自定义解码器创建
    pub fn new(decoder: impl SymbolDecoder + 'static, corner_fraction: f32) -> Self {
        Self {
            decoder: Box::new(decoder),
            corner_fraction: corner_fraction.clamp(0.05, 0.5),
        }
    }

    /// 使用二维码解码器创建
    pub fn qr(corner_fraction: f32) -> Self {
        Self::new(QrSymbolDecoder, corner_fraction)
    }

    /// 从编码后的图像字节读码；图像无法解码时返回零个码并附带诊断
    pub fn read_bytes(&self, bytes: &[u8]) -> PageReading {
        match image::load_from_memory(bytes) {
            Ok(decoded) => self.read_image(&decoded.to_luma8()),
            Err(e) => PageReading::unreadable(format!("图像无法解码: {}", e)),
        }
    }

    /// 从灰度图读码
    pub fn read_image(&self, image: &GrayImage) -> PageReading {
        let mut slots: CornerSlots = Default::default();
        let mut diagnostics = Vec::new();

        if image.width() == 0 || image.height() == 0 {
            return PageReading::unreadable("图像尺寸为零".to_string());
        }

        for physical in Corner::ALL {
            let region = self.corner_region(image, physical);
            for raw in self.decoder.decode_region(&region) {
                match codec::decode_any(&raw) {
                    Ok(code) => {
                        let slot = &mut slots[physical.slot()];
                        if slot.is_none() {
                            *slot = Some(code);
                        } else if slot.as_ref() != Some(&code) {
                            diagnostics
                                .push(format!("{} 角读到多个不同的码，保留第一个", physical));
                        }
                    }
                    Err(e) => diagnostics.push(format!("{} 角: {}", physical, e)),
                }
            }
        }

        PageReading {
            rotation: infer_rotation(&slots),
            slots,
            diagnostics,
        }
    }

    /// 裁出物理角区域
    fn corner_region(&self, image: &GrayImage, corner: Corner) -> GrayImage {
        let (width, height) = image.dimensions();
        let region_w = ((width as f32 * self.corner_fraction).round() as u32).clamp(1, width);
        let region_h = ((height as f32 * self.corner_fraction).round() as u32).clamp(1, height);

        let (x, y) = match corner {
            Corner::TopRight => (width - region_w, 0),
            Corner::TopLeft => (0, 0),
            Corner::BottomLeft => (0, height - region_h),
            Corner::BottomRight => (width - region_w, height - region_h),
        };

        imageops::crop_imm(image, x, y, region_w, region_h).to_image()
    }
}

/// 根据"逻辑角 vs 物理角"推断旋转
///
/// 每个码都应满足 物理角 = 逻辑角 逆时针转 r 次；所有码给出同一个 r 时才算确定。
pub fn infer_rotation(slots: &CornerSlots) -> RotationReading {
    let mut found: Option<u8> = None;

    for physical in Corner::ALL {
        let Some(code) = &slots[physical.slot()] else {
            continue;
        };
        let logical = code.corner();
        let turns = (physical.index() + 4 - logical.index()) % 4;
        match found {
            None => found = Some(turns),
            Some(previous) if previous == turns => {}
            Some(_) => return RotationReading::Ambiguous,
        }
    }

    match found {
        Some(turns) => RotationReading::Known(Rotation::from_quarter_turns(turns)),
        None => RotationReading::NoCodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodedCode;
    use image::{DynamicImage, ImageFormat, Luma};
    use std::collections::HashMap;
    use std::io::Cursor;

    /// 读取区域中心像素的灰度，查表得到"码"
    struct LevelDecoder {
        codes: HashMap<u8, String>,
    }

    impl SymbolDecoder for LevelDecoder {
        fn decode_region(&self, region: &GrayImage) -> Vec<String> {
            let level = region
                .get_pixel(region.width() / 2, region.height() / 2)
                .0[0];
            self.codes.get(&level).cloned().into_iter().collect()
        }
    }

    /// 四个象限分别涂上指定灰度
    fn quadrant_image(levels: [u8; 4]) -> GrayImage {
        let mut image = GrayImage::from_pixel(40, 40, Luma([0]));
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let corner = match (x >= 20, y >= 20) {
                (true, false) => Corner::TopRight,
                (false, false) => Corner::TopLeft,
                (false, true) => Corner::BottomLeft,
                (true, true) => Corner::BottomRight,
            };
            *pixel = Luma([levels[corner.slot()]]);
        }
        image
    }

    fn scrap(corner: Corner) -> Option<DecodedCode> {
        Some(DecodedCode::Scrap { corner })
    }

    #[test]
    fn test_rotation_exhaustive() {
        for rotation in Rotation::ALL {
            for mask in 0u8..16 {
                let mut slots: CornerSlots = Default::default();
                for logical in Corner::ALL {
                    if mask & (1 << logical.slot()) != 0 {
                        let physical = logical.turned_ccw(rotation.quarter_turns());
                        slots[physical.slot()] = scrap(logical);
                    }
                }
                let expected = if mask == 0 {
                    RotationReading::NoCodes
                } else {
                    RotationReading::Known(rotation)
                };
                assert_eq!(
                    infer_rotation(&slots),
                    expected,
                    "rotation {:?} mask {:04b}",
                    rotation,
                    mask
                );
            }
        }
    }

    #[test]
    fn test_rotation_ambiguous() {
        let mut slots: CornerSlots = Default::default();
        // 右上角读到逻辑右上（0 转），左上角读到逻辑右下（2 转）
        slots[Corner::TopRight.slot()] = scrap(Corner::TopRight);
        slots[Corner::TopLeft.slot()] = scrap(Corner::BottomRight);
        assert_eq!(infer_rotation(&slots), RotationReading::Ambiguous);
    }

    #[test]
    fn test_read_image_upright_with_staple_corner_missing() {
        let public = "123456";
        let codes: HashMap<u8, String> = [
            (10, codec::encode(7, 1, 1, Corner::TopRight, public).unwrap()),
            (20, codec::encode(7, 1, 1, Corner::TopLeft, public).unwrap()),
            (30, codec::encode(7, 1, 1, Corner::BottomLeft, public).unwrap()),
        ]
        .into_iter()
        .collect();
        let reader = CodeReader::new(LevelDecoder { codes }, 0.5);

        // 右下角没有码（被订书钉挡住）
        let reading = reader.read_image(&quadrant_image([10, 20, 30, 0]));
        assert_eq!(reading.slots.iter().flatten().count(), 3);
        assert!(reading.slots[Corner::BottomRight.slot()].is_none());
        assert_eq!(reading.rotation, RotationReading::Known(Rotation::Deg0));
        assert!(reading.diagnostics.is_empty());
    }

    #[test]
    fn test_read_image_upside_down() {
        let public = "123456";
        let codes: HashMap<u8, String> = [
            (10, codec::encode(3, 2, 1, Corner::TopRight, public).unwrap()),
            (40, codec::encode(3, 2, 1, Corner::BottomRight, public).unwrap()),
        ]
        .into_iter()
        .collect();
        let reader = CodeReader::new(LevelDecoder { codes }, 0.5);

        // 倒置：逻辑右上出现在物理左下，逻辑右下出现在物理左上
        let reading = reader.read_image(&quadrant_image([0, 40, 10, 0]));
        assert_eq!(reading.rotation, RotationReading::Known(Rotation::Deg180));
    }

    #[test]
    fn test_malformed_code_is_diagnostic_not_error() {
        let codes: HashMap<u8, String> = [(10, "not-a-code".to_string())].into_iter().collect();
        let reader = CodeReader::new(LevelDecoder { codes }, 0.5);

        let reading = reader.read_image(&quadrant_image([10, 0, 0, 0]));
        assert!(reading.slots.iter().all(|s| s.is_none()));
        assert_eq!(reading.rotation, RotationReading::NoCodes);
        assert_eq!(reading.diagnostics.len(), 1);
    }

    #[test]
    fn test_unreadable_bytes() {
        let reader = CodeReader::qr(DEFAULT_CORNER_FRACTION);
        let reading = reader.read_bytes(b"definitely not an image");
        assert!(reading.slots.iter().all(|s| s.is_none()));
        assert_eq!(reading.diagnostics.len(), 1);
    }

    /// 渲染二维码：每个模块 `scale` 像素，四周留 4 个模块的静区
    fn qr_symbol(text: &str, scale: u32) -> GrayImage {
        let code = qrcode::QrCode::new(text.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let quiet = 4;
        let size = (modules + 2 * quiet) * scale;
        GrayImage::from_fn(size, size, |x, y| {
            let (mx, my) = (x / scale, y / scale);
            let inside = (quiet..quiet + modules).contains(&mx)
                && (quiet..quiet + modules).contains(&my);
            let dark = inside
                && code[((mx - quiet) as usize, (my - quiet) as usize)] == qrcode::Color::Dark;
            Luma([if dark { 0 } else { 255 }])
        })
    }

    /// 白纸四角按逻辑角印上页码，`staple` 角空着
    fn printed_sheet(paper: u32, page: u32, staple: Corner) -> GrayImage {
        let size = 480;
        let mut sheet = GrayImage::from_pixel(size, size, Luma([255]));
        for corner in Corner::ALL.into_iter().filter(|c| *c != staple) {
            let raw = codec::encode(paper, page, 1, corner, "123456").unwrap();
            let symbol = qr_symbol(&raw, 4);
            let edge = size - symbol.width();
            let (x, y) = match corner {
                Corner::TopRight => (edge, 0),
                Corner::TopLeft => (0, 0),
                Corner::BottomLeft => (0, edge),
                Corner::BottomRight => (edge, edge),
            };
            imageops::overlay(&mut sheet, &symbol, i64::from(x), i64::from(y));
        }
        sheet
    }

    fn png_bytes(image: GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_qr_reader_reads_printed_sheet() {
        let reader = CodeReader::qr(DEFAULT_CORNER_FRACTION);
        let reading = reader.read_bytes(&png_bytes(printed_sheet(7, 2, Corner::BottomRight)));

        assert_eq!(reading.rotation, RotationReading::Known(Rotation::Deg0));
        assert!(reading.diagnostics.is_empty(), "{:?}", reading.diagnostics);
        assert!(reading.slots[Corner::BottomRight.slot()].is_none());
        for physical in [Corner::TopRight, Corner::TopLeft, Corner::BottomLeft] {
            match &reading.slots[physical.slot()] {
                Some(DecodedCode::Page(code)) => {
                    assert_eq!((code.paper, code.page, code.version), (7, 2, 1));
                    assert_eq!(code.corner, physical);
                    assert_eq!(code.public_code, "123456");
                }
                other => panic!("{} 角: {:?}", physical, other),
            }
        }
    }

    #[test]
    fn test_qr_reader_infers_upside_down_sheet() {
        let sheet = printed_sheet(12, 3, Corner::BottomRight);
        let reader = CodeReader::qr(DEFAULT_CORNER_FRACTION);
        let reading = reader.read_bytes(&png_bytes(imageops::rotate180(&sheet)));

        assert_eq!(reading.rotation, RotationReading::Known(Rotation::Deg180));
        assert_eq!(reading.slots.iter().flatten().count(), 3);
        // 被订书钉挡住的逻辑右下角转到了物理左上角
        assert!(reading.slots[Corner::TopLeft.slot()].is_none());
        match &reading.slots[Corner::BottomLeft.slot()] {
            Some(DecodedCode::Page(code)) => {
                assert_eq!((code.paper, code.page), (12, 3));
                assert_eq!(code.corner, Corner::TopRight);
            }
            other => panic!("左下角: {:?}", other),
        }
    }
}
