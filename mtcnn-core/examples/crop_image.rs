//! Crop every face in an image and write the crops as PNG files.
//!
//! Usage: `cargo run --example crop_image -- <image> <output-dir> [settings.json]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use log::{LevelFilter, info};
use mtcnn_core::{FaceCropper, face_limit_from};
use mtcnn_utils::{CropperSettings, apply_telemetry_settings, init_logging};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let image_path = PathBuf::from(args.next().context("missing image path")?);
    let output_dir = PathBuf::from(args.next().context("missing output directory")?);
    let settings = match args.next() {
        Some(path) => CropperSettings::load_from_path(path)?,
        None => CropperSettings::default(),
    };

    init_logging(LevelFilter::Info)?;
    apply_telemetry_settings(&settings.telemetry);

    let cropper = FaceCropper::from_settings(&settings)?;
    let image = image::open(&image_path)
        .with_context(|| format!("failed to open {}", image_path.display()))?;
    let faces = cropper.crop_faces_in_image(&image, face_limit_from(settings.face_limit))?;

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    for (index, face) in faces.iter().enumerate() {
        let (height, width, _) = face.image.dim();
        let crop = RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let px = |c: usize| {
                face.image[(y as usize, x as usize, c)]
                    .round()
                    .clamp(0.0, 255.0) as u8
            };
            Rgb([px(0), px(1), px(2)])
        });
        let out = output_dir.join(format!("face_{index:02}.png"));
        crop.save(&out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!("face {index}: {:?} -> {}", face.bbox, out.display());
    }
    Ok(())
}
