//! Preview how an image looks on a panel
//!
//! Run with: cargo run --example convert -- <input> <color-spec> <output> [bit-depth]
//!
//! For example:
//!   cargo run --example convert -- photo.jpg 3b7 photo-7color.png
//!
//! The output format follows the output file extension (png, bmp, jpg).

use fruitstand::color::{self, COLOR_SPECS};
use fruitstand::model::ImageFormat;

fn usage() -> ! {
    eprintln!("usage: convert <input> <color-spec> <output> [bit-depth]");
    eprintln!();
    eprintln!("color specs:");
    for spec in COLOR_SPECS {
        eprintln!("  {:<5} {:>2} bits  {}", spec.key, spec.bits, spec.name);
    }
    std::process::exit(2);
}

fn main() -> Result<(), fruitstand::Error> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        usage();
    }
    let (input, spec, output) = (&args[0], &args[1], &args[2]);
    let bit_depth = match args.get(3) {
        Some(raw) => Some(raw.parse::<u8>().unwrap_or_else(|_| usage())),
        None => None,
    };

    let format = output
        .rsplit('.')
        .next()
        .and_then(ImageFormat::parse)
        .unwrap_or_default();

    let bytes = std::fs::read(input)?;
    let rgb = color::decode(&bytes)?;
    let converted = color::convert_colors(&rgb, spec, bit_depth);
    println!(
        "{}: {}x{} -> {} ({} bits)",
        input,
        rgb.width(),
        rgb.height(),
        color::color_spec(spec).name,
        converted.bits()
    );

    std::fs::write(output, color::encode(converted, format)?)?;
    println!("Wrote {}", output);
    Ok(())
}
