// examples/visualize.rs
// ------------------------------------------------------------
// Visual smoke-test: run Canny on a still image, write the edge map.
// cargo run -p edgecam-detect --example visualize -- <in.jpg> <out.png> [low high]
// ------------------------------------------------------------
use anyhow::{Context, Result};
use edgecam_camera::GrayscalePlane;
use edgecam_detect::{CannyDetector, EdgeTransform, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 && args.len() != 5 {
        eprintln!("usage: visualize <image> <edges.png> [low high]");
        std::process::exit(1);
    }
    let (low, high) = if args.len() == 5 {
        (args[3].parse()?, args[4].parse()?)
    } else {
        (DEFAULT_LOW_THRESHOLD, DEFAULT_HIGH_THRESHOLD)
    };

    let gray = image::open(&args[1])
        .with_context(|| format!("reading {}", args[1]))?
        .to_luma8();
    let plane = GrayscalePlane::new(gray, 0);

    let transform = EdgeTransform::new(Box::new(CannyDetector::new(low, high)?));
    let edges = transform.detect(&plane)?;
    println!(
        "{}x{}: {} edge pixels (low {low}, high {high})",
        edges.width(),
        edges.height(),
        edges.edge_pixels()
    );

    edges
        .as_image()
        .save(&args[2])
        .with_context(|| format!("writing {}", args[2]))?;
    Ok(())
}
