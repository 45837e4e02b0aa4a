//! rtk-trace - demo renderer driving the rtk kernel.
//!
//! Loads an OBJ file, builds a scene and writes a PNG of primary-ray
//! shading. The kernel does all the heavy lifting; this binary is argument
//! parsing, asset loading and a pixel loop.

mod loader;

use anyhow::{Context, Result};
use rayon::prelude::*;
use rtk::math::Vec3;
use rtk::{Mesh, Object, Ray, Scene, SceneDesc};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

const WIDTH: usize = 1280;
const HEIGHT: usize = 720;

struct Args {
    input: PathBuf,
    output: PathBuf,
    samples: u32,
    camera: Option<(Vec3, Vec3)>,
}

fn print_usage() {
    eprintln!("Usage: rtk-trace <input.obj> <output.png> [--samples N] [--camera x y z dx dy dz]");
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional: Vec<&String> = Vec::new();
    let mut samples = 1u32;
    let mut camera = None;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--samples" => {
                let value = it.next().ok_or("--samples needs a value")?;
                samples = value
                    .parse::<u32>()
                    .map_err(|_| format!("invalid sample count '{value}'"))?
                    .max(1);
            }
            "--camera" => {
                let mut v = [0.0f32; 6];
                for slot in &mut v {
                    let value = it.next().ok_or("--camera needs 6 values")?;
                    *slot = value
                        .parse()
                        .map_err(|_| format!("invalid camera value '{value}'"))?;
                }
                let pos = Vec3::new(v[0], v[1], v[2]);
                let dir = Vec3::new(v[3], v[4], v[5]).normalize();
                camera = Some((pos, dir));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        return Err("expected <input> and <output>".into());
    }
    Ok(Args {
        input: PathBuf::from(positional[0]),
        output: PathBuf::from(positional[1]),
        samples,
        camera,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("Error: {msg}");
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&args) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let loaded = loader::load_obj(&args.input)
        .with_context(|| format!("loading '{}'", args.input.display()))?;
    for m in &loaded {
        debug!(name = %m.name, triangles = m.indices.len() / 3, "mesh loaded");
    }

    let meshes: Vec<Mesh<'_>> = loaded
        .iter()
        .enumerate()
        .map(|(i, m)| Mesh {
            vertices: &m.positions,
            normals: (!m.normals.is_empty()).then_some(m.normals.as_slice()),
            uvs: (!m.uvs.is_empty()).then_some(m.uvs.as_slice()),
            indices: &m.indices,
            object: Object::new(0, i),
            ..Default::default()
        })
        .collect();

    let scene = Scene::build(&SceneDesc {
        meshes: &meshes,
        ..Default::default()
    });
    info!(
        meshes = meshes.len(),
        bytes = scene.used_memory(),
        "scene built"
    );

    let (cam_pos, cam_dir) = args.camera.unwrap_or_else(|| frame_scene(&scene));
    let pixels = render(&scene, cam_pos, cam_dir, args.samples);

    image::save_buffer(
        &args.output,
        &pixels,
        WIDTH as u32,
        HEIGHT as u32,
        image::ExtendedColorType::Rgba8,
    )
    .with_context(|| format!("writing '{}'", args.output.display()))?;
    info!(output = %args.output.display(), "image written");
    Ok(())
}

/// Default camera: pull back from the scene bounds along +z.
fn frame_scene(scene: &Scene) -> (Vec3, Vec3) {
    let bounds = scene.bounds();
    if bounds.is_empty() {
        return (Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
    }
    let center = bounds.center();
    let radius = 0.5 * bounds.size().length();
    let pos = center + Vec3::new(0.0, radius * 0.4, radius * 2.2);
    (pos, (center - pos).normalize())
}

fn shade(scene: &Scene, ray: &Ray) -> Vec3 {
    match scene.raytrace(ray, f32::INFINITY) {
        Some(hit) => {
            // Headlight shading off the interpolated normal.
            let k = hit.interp.normal.dot(-ray.direction.normalize()).abs();
            Vec3::splat(0.15 + 0.65 * k)
        }
        None => Vec3::ZERO,
    }
}

/// Low-bias integer hash mapped to [0, 1), for sample jitter.
fn hash01(mut h: u32) -> f32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    (h >> 8) as f32 / 16_777_216.0
}

fn render(scene: &Scene, cam_pos: Vec3, cam_dir: Vec3, samples: u32) -> Vec<u8> {
    let world_up = Vec3::Y;
    let right = cam_dir.cross(world_up).normalize();
    let up = right.cross(cam_dir);

    let mut pixels = vec![0u8; WIDTH * HEIGHT * 4];
    pixels
        .par_chunks_exact_mut(WIDTH * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..WIDTH {
                let mut color = Vec3::ZERO;
                for s in 0..samples {
                    let (jx, jy) = if samples == 1 {
                        (0.0, 0.0)
                    } else {
                        let seed = (y * WIDTH + x) as u32;
                        (
                            hash01(seed.wrapping_mul(2).wrapping_add(s)),
                            hash01(seed.wrapping_mul(2).wrapping_add(s).wrapping_add(0x9e37)),
                        )
                    };
                    let vx = (x as f32 + jx - WIDTH as f32 / 2.0) / HEIGHT as f32;
                    let vy = -(y as f32 + jy - HEIGHT as f32 / 2.0) / HEIGHT as f32;
                    let ray = Ray::new(cam_pos, cam_dir + right * vx + up * vy);
                    color += shade(scene, &ray);
                }
                color /= samples as f32;

                let px = &mut row[x * 4..x * 4 + 4];
                px[0] = (color.x * 255.0) as u8;
                px[1] = (color.y * 255.0) as u8;
                px[2] = (color.z * 255.0) as u8;
                px[3] = 0xff;
            }
        });
    pixels
}
