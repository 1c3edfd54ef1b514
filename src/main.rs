use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use std::time::Instant;

use splatsort::math::Vec3;
use splatsort::{
    Algorithm, AtomicHeap, CameraPose, SortConfig, SortMode, SortOrder, Sorter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AlgorithmArg {
    Counting,
    Radix,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Radial,
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OrderArg {
    FrontToBack,
    BackToFront,
}

#[derive(Debug, Parser)]
#[command(name = "splatsort", version, about = "Visibility-ordering benchmark for Gaussian splat scenes")]
struct Cli {
    #[arg(long, value_name = "N", default_value_t = 200_000, help = "Splat count")]
    count: usize,
    #[arg(long, value_enum, default_value = "radix")]
    algorithm: AlgorithmArg,
    #[arg(long, value_enum, default_value = "radial")]
    mode: ModeArg,
    #[arg(long, value_enum, default_value = "back-to-front")]
    order: OrderArg,
    #[arg(long, default_value_t = 256, help = "Bucket budget for the counting path")]
    buckets: u32,
    #[arg(long, help = "Camera-relative bucket widths (counting path)")]
    camera_relative: bool,
    #[arg(long, default_value_t = 120, help = "Simulated camera-orbit frames")]
    frames: usize,
    #[arg(long, default_value_t = 0xC0FFEE)]
    seed: u64,
    #[arg(long, help = "Also benchmark incremental heap insert/extract")]
    heap: bool,
}

fn generate_cloud(count: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut positions = Vec::with_capacity(count);

    // A few clusters plus a diffuse shell, so depth keys are unevenly
    // distributed the way scanned scenes are.
    let centers = [
        Vec3::new(2.5, 0.4, 0.6),
        Vec3::new(-2.2, -0.3, 1.1),
        Vec3::new(0.4, 1.7, -2.3),
    ];
    for i in 0..count {
        let position = if i % 4 == 3 {
            let theta = rng.random_range(0.0_f32..TAU);
            let z = rng.random_range(-1.0_f32..1.0_f32);
            let r = (1.0 - z * z).sqrt() * 8.0;
            Vec3::new(r * theta.cos(), z * 8.0, r * theta.sin())
        } else {
            let center = centers[i % centers.len()];
            center
                + Vec3::new(
                    rng.random_range(-1.2_f32..1.2_f32),
                    rng.random_range(-1.2_f32..1.2_f32),
                    rng.random_range(-1.2_f32..1.2_f32),
                )
        };
        positions.push(position);
    }

    positions
}

fn orbit_pose(frame: usize, frames: usize) -> CameraPose {
    let angle = frame as f32 / frames.max(1) as f32 * TAU;
    let position = Vec3::new(angle.cos() * 14.0, 3.0, angle.sin() * 14.0);
    CameraPose::looking_at(position, Vec3::ZERO)
}

fn verify_permutation(perm: &[u32], n: usize) -> bool {
    let mut seen = vec![false; n];
    perm.len() == n
        && perm.iter().all(|&i| {
            let slot = i as usize;
            slot < n && !std::mem::replace(&mut seen[slot], true)
        })
}

fn run_heap_bench(positions: &[Vec3], pose: &CameraPose) {
    let start = Instant::now();
    let heap = AtomicHeap::new(positions.len());
    for (i, p) in positions.iter().enumerate() {
        let key = splatsort::encode_key(
            p.distance_squared(pose.position),
            SortOrder::FrontToBack,
        );
        heap.push(key, i as u32);
    }
    let mut heap = heap;
    let drained = heap.drain_sorted();
    let elapsed = start.elapsed();

    let ordered = drained.windows(2).all(|w| w[0].0 <= w[1].0);
    println!(
        "heap      | insert+extract {} entries in {:>8.3} ms | ordered: {}",
        drained.len(),
        elapsed.as_secs_f64() * 1e3,
        ordered
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let algorithm = match cli.algorithm {
        AlgorithmArg::Counting => Algorithm::Counting,
        AlgorithmArg::Radix => Algorithm::Radix,
        AlgorithmArg::Fallback => Algorithm::Fallback,
    };
    let config = SortConfig {
        algorithm,
        mode: match cli.mode {
            ModeArg::Radial => SortMode::Radial,
            ModeArg::Planar => SortMode::Planar,
        },
        order: match cli.order {
            OrderArg::FrontToBack => SortOrder::FrontToBack,
            OrderArg::BackToFront => SortOrder::BackToFront,
        },
        bucket_count: cli.buckets,
        camera_relative: cli.camera_relative,
        ..SortConfig::default()
    };

    let positions = generate_cloud(cli.count, cli.seed);
    let mut sorter = Sorter::new(positions.len(), config)?;

    println!(
        "splatsort | {} splats | {:?} / {:?} / {:?}",
        positions.len(),
        algorithm,
        cli.mode,
        cli.order
    );

    let mut resort_time = 0.0f64;
    let mut worst_frame = 0.0f64;
    for frame in 0..cli.frames {
        let pose = orbit_pose(frame, cli.frames);
        let start = Instant::now();
        let outcome = sorter.sort(&positions, &pose)?;
        let elapsed = start.elapsed().as_secs_f64() * 1e3;

        if outcome.was_resorted() {
            resort_time += elapsed;
            worst_frame = worst_frame.max(elapsed);
            if frame % 30 == 0 && !verify_permutation(outcome.permutation(), positions.len()) {
                return Err("sort produced a non-bijective permutation".into());
            }
        }
    }

    let stats = sorter.stats();
    println!(
        "frames    | {} total, {} resorts, {} gate skips",
        cli.frames, stats.resorts, stats.skips
    );
    if stats.resorts > 0 {
        println!(
            "timing    | avg resort {:>8.3} ms | worst {:>8.3} ms",
            resort_time / stats.resorts as f64,
            worst_frame
        );
    }
    if stats.sync_timeouts > 0 || stats.aborted_sorts > 0 {
        println!(
            "fallback  | {} spin timeouts, {} sorts aborted to identity",
            stats.sync_timeouts, stats.aborted_sorts
        );
    }
    if stats.sanitized_keys > 0 {
        println!("input     | {} non-finite keys sanitized", stats.sanitized_keys);
    }

    if cli.heap {
        run_heap_bench(&positions, &orbit_pose(0, cli.frames));
    }

    Ok(())
}
