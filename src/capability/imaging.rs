use crate::error::AppError;
use crate::models::PixelRect;
use base64::{engine::general_purpose, Engine as _};
use image::DynamicImage;

/// 解码 base64 图像, 兼容 data URL 前缀
pub fn decode_base64_image(data: &str) -> Result<DynamicImage, AppError> {
    let payload = match data.find("base64,") {
        Some(pos) => &data[pos + "base64,".len()..],
        None => data,
    };

    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| AppError::InvalidArgument(format!("imageBase64 is not valid base64: {}", e)))?;

    image::load_from_memory(&bytes).map_err(|e| {
        AppError::InvalidArgument(format!("imageBase64 is not a decodable image: {}", e))
    })
}

/// PNG 编码后转 base64
pub fn encode_png_base64(image: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buffer = Vec::new();
    image.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(&buffer))
}

pub fn crop(image: &DynamicImage, rect: PixelRect) -> DynamicImage {
    image.crop_imm(rect.x, rect.y, rect.width, rect.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    #[test]
    fn test_decode_round_trips_png_and_data_url() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(12, 7));
        let encoded = encode_png_base64(&image).unwrap();

        let decoded = decode_base64_image(&encoded).unwrap();
        assert_eq!(decoded.dimensions(), (12, 7));

        let with_prefix = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_base64_image(&with_prefix).unwrap().dimensions(), (12, 7));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_base64_image("not base64 !!"),
            Err(AppError::InvalidArgument(_))
        ));
        // valid base64, not an image
        assert!(matches!(
            decode_base64_image("aGVsbG8gd29ybGQ="),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_crop_dimensions() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let cropped = crop(&image, PixelRect { x: 15, y: 5, width: 50, height: 30 });
        assert_eq!(cropped.dimensions(), (50, 30));
    }
}
