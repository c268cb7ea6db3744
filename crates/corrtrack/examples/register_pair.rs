use corrtrack::{Correlator, TrackingMode};
use image::ImageReader;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <source.png> <target.png> [out.json]", args[0]);
        std::process::exit(2);
    }

    let source = ImageReader::open(&args[1])?.decode()?.to_luma8();
    let target = ImageReader::open(&args[2])?.decode()?.to_luma8();

    let correlator = Correlator::default();
    let grid = correlator.grid(&source, 40.0, 50.0)?;
    let images = [source, target];
    let field = correlator.track(&images, &grid.points(), TrackingMode::Eulerian, &Default::default())?;

    println!(
        "Measured {} of {} displacements on a {}x{} grid.",
        field.n_valid(),
        grid.len(),
        grid.xs.len(),
        grid.ys.len()
    );
    if let Some(fit) = correlator.fit(&field).into_iter().next().flatten() {
        let e = fit.green_lagrange_strain();
        println!("Strain: Exx={:.5} Eyy={:.5} Exy={:.5}", e[(0, 0)], e[(1, 1)], e[(0, 1)]);
    }

    if let Some(out_path) = args.get(3) {
        let json = serde_json::to_string_pretty(&field)?;
        std::fs::write(out_path, json)?;
        println!("Wrote {out_path}");
    }
    Ok(())
}
