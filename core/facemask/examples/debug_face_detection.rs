//! Run the SSD detector over images, draw the boxes it finds, and check how
//! many faces remain detectable after each anonymization strength.
//!
//! Usage:
//!   FACEMASK_MODEL_PATH=res10_300x300_ssd.onnx \
//!     cargo run --example debug_face_detection -- photo1.jpg photo2.png
//!
//! Annotated copies are written next to each input as `<name>.boxes.png`.
//! Set `RUST_LOG=facemask=debug` for per-call detection logs.

use std::path::Path;

use facemask::transform::transform;
use facemask::{codec, Detector, FaceBox, Mode, SsdFaceDetector};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing_subscriber::EnvFilter;

const MAX_DIMENSION: u32 = 800;
const THRESHOLD: f32 = 0.5;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let backend = SsdFaceDetector::from_env().expect("set FACEMASK_MODEL_PATH to the SSD model");
    backend.preload().expect("failed to load model");
    println!("model: {}", backend.model_path().display());
    let detector = Detector::new(Box::new(backend));

    let inputs: Vec<String> = std::env::args().skip(1).collect();
    if inputs.is_empty() {
        eprintln!("usage: debug_face_detection <image>...");
        std::process::exit(2);
    }

    for input_path in &inputs {
        let input = std::fs::read(input_path).unwrap();
        let image = codec::decode(&input).unwrap();
        let (width, height) = image.dimensions();

        println!("=== {input_path} ({width}x{height}) ===");

        let faces = detector.detect(&image, MAX_DIMENSION, THRESHOLD);
        if faces.is_empty() {
            println!("  NO FACES DETECTED, image would pass through unchanged");
            println!();
            continue;
        }

        println!("  Found {} face(s):", faces.len());
        for (i, face) in faces.iter().enumerate() {
            println!(
                "    face {i}: ({}, {}) - ({}, {}), {}x{}",
                face.x1,
                face.y1,
                face.x2,
                face.y2,
                face.width(),
                face.height(),
            );
        }

        let mut annotated = image.clone();
        for face in &faces {
            if face.width() > 0 && face.height() > 0 {
                let rect = Rect::at(face.x1, face.y1)
                    .of_size(face.width() as u32, face.height() as u32);
                draw_hollow_rect_mut(&mut annotated, rect, image::Rgb([255, 0, 0]));
            }
        }
        let out_path = Path::new(input_path).with_extension("boxes.png");
        annotated.save(&out_path).unwrap();
        println!("  -> boxes drawn to {}", out_path.display());

        // Re-detect on anonymized output: a face still found means the strength is too weak.
        for (mode, strengths) in [
            (Mode::Pixelate, &[5u32, 10, 15, 25][..]),
            (Mode::Blur, &[11u32, 31, 51][..]),
        ] {
            for &strength in strengths {
                let anonymized = transform(&image, &faces, mode, strength);
                let remaining = detector.detect(&anonymized, MAX_DIMENSION, THRESHOLD);
                println!(
                    "  -> {mode:?} {strength:>2}: {} of {} face(s) still detectable{}",
                    remaining.len(),
                    faces.len(),
                    overlap_note(&faces, &remaining),
                );
            }
        }
        println!();
    }
}

fn overlap_note(original: &[FaceBox], remaining: &[FaceBox]) -> &'static str {
    let overlaps = remaining.iter().any(|r| {
        original
            .iter()
            .any(|o| r.x1 < o.x2 && o.x1 < r.x2 && r.y1 < o.y2 && o.y1 < r.y2)
    });
    if overlaps {
        " (inside an anonymized region)"
    } else {
        ""
    }
}
