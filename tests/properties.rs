mod util;
use util::*;

use mesh_particles::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Field constant on each coarse cell of an `nx × ny` unit-square grid.
fn coarse_pattern(pattern: Vec<bool>, nx: usize, ny: usize) -> impl Fn([f64; 3]) -> f64 + Sync {
    move |x| {
        let i = ((x[0] * nx as f64) as usize).min(nx - 1);
        let j = ((x[1] * ny as f64) as usize).min(ny - 1);
        if pattern[j * nx + i] { 1.0 } else { 0.0 }
    }
}

/// Serial reference: 4-connected components of `pattern`, as sorted sizes.
fn reference_sizes(pattern: &[bool], nx: usize, ny: usize) -> Vec<usize> {
    let mut uf = UnionFind::new(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let k = j * nx + i;
            if !pattern[k] {
                continue;
            }
            if i + 1 < nx && pattern[k + 1] {
                uf.union(k, k + 1);
            }
            if j + 1 < ny && pattern[k + nx] {
                uf.union(k, k + nx);
            }
        }
    }
    let mut sizes = std::collections::BTreeMap::new();
    for k in (0..nx * ny).filter(|&k| pattern[k]) {
        *sizes.entry(uf.find(k)).or_insert(0usize) += 1;
    }
    let mut out: Vec<usize> = sizes.into_values().collect();
    out.sort_unstable();
    out
}

fn table_of(results: &[(InMemoryCellMesh, ParticleReport)]) -> ParticleTable {
    results[0].1.table.clone().unwrap()
}

#[test]
fn band_across_n_ranks_is_one_particle() {
    for n in 1..=5 {
        let mut mesh = BoxMesh::interval(0.0, n as f64, 4 * n).unwrap();
        mesh.refine_global(1);
        let results = identify_on(&mesh, n, x_strips(0.0, n as f64, n), |_| 1.0, &ParticleConfig::default());
        for (_, r) in &results {
            assert_eq!(r.n_particles, 1, "{n} ranks");
        }
        let t = table_of(&results);
        assert!((t.particles[0].volume - n as f64).abs() < 1e-12);
        assert!((t.particles[0].centroid[0] - n as f64 / 2.0).abs() < 1e-12);
    }
}

#[test]
fn band_in_2d_merges_across_strips() {
    let mut mesh = BoxMesh::rectangle([0.0, 0.0], [3.0, 1.0], [12, 4]).unwrap();
    mesh.refine_global(1);
    let band = |x: [f64; 3]| if (x[1] - 0.5).abs() < 0.15 { 1.0 } else { 0.0 };
    let results = identify_on(&mesh, 3, x_strips(0.0, 3.0, 3), band, &ParticleConfig::default());
    assert_eq!(results[0].1.n_particles, 1);
    let t = table_of(&results);
    assert!((t.particles[0].volume - 0.75).abs() < 1e-12);
}

#[test]
fn isolated_blobs_keep_their_own_ids() {
    // one square blob per rank, strictly inside its strip
    let n = 4;
    let mut mesh = BoxMesh::rectangle([0.0, 0.0], [4.0, 1.0], [16, 4]).unwrap();
    mesh.refine_global(1);
    let blobs = |x: [f64; 3]| {
        let local = x[0].fract();
        if (0.25..0.75).contains(&local) && (0.25..0.75).contains(&x[1]) { 1.0 } else { 0.0 }
    };
    let results = identify_on(&mesh, n, x_strips(0.0, 4.0, n), blobs, &ParticleConfig::default());
    let t = table_of(&results);
    assert_eq!(t.len(), n);
    let mut xs: Vec<f64> = t.iter().map(|p| p.centroid[0]).collect();
    xs.sort_by(f64::total_cmp);
    for (k, x) in xs.iter().enumerate() {
        assert!((x - (k as f64 + 0.5)).abs() < 1e-12);
    }
    for p in t.iter() {
        assert!((p.volume - 0.25).abs() < 1e-12);
        assert!((p.centroid[1] - 0.5).abs() < 1e-12);
    }
    // each particle lives on exactly one rank
    for (_, r) in &results {
        let mut ids: Vec<ParticleId> = r.cell_particles.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}

#[test]
fn volume_is_conserved() {
    let mut rng = SmallRng::seed_from_u64(7);
    let (nx, ny) = (10, 10);
    let pattern: Vec<bool> = (0..nx * ny).map(|_| rng.gen_bool(0.45)).collect();
    let mut mesh = BoxMesh::rectangle([0.0, 0.0], [1.0, 1.0], [nx, ny]).unwrap();
    mesh.refine_where(|r| r.center[0] < 0.5);
    let field = coarse_pattern(pattern.clone(), nx, ny);
    let results = identify_on(&mesh, 3, x_strips(0.0, 1.0, 3), &field, &ParticleConfig::default());
    let admitted: f64 = results
        .iter()
        .flat_map(|(v, _)| {
            v.owned_cells()
                .map(|c| v.record(c).unwrap())
                .filter(|r| field(r.center) > 0.5)
                .map(|r| r.measure)
                .collect::<Vec<_>>()
        })
        .sum();
    let t = table_of(&results);
    assert!((t.total_volume() - admitted).abs() < 1e-12);
    let cells = pattern.iter().filter(|&&b| b).count() as f64;
    assert!((admitted - cells / (nx * ny) as f64).abs() < 1e-12);
}

#[test]
fn reruns_give_the_same_classes() {
    let mut rng = SmallRng::seed_from_u64(11);
    let (nx, ny) = (8, 8);
    let pattern: Vec<bool> = (0..nx * ny).map(|_| rng.gen_bool(0.5)).collect();
    let mesh = BoxMesh::rectangle([0.0, 0.0], [1.0, 1.0], [nx, ny]).unwrap();
    let field = coarse_pattern(pattern, nx, ny);
    let first = identify_on(&mesh, 4, x_strips(0.0, 1.0, 4), &field, &ParticleConfig::default());
    let second = identify_on(&mesh, 4, x_strips(0.0, 1.0, 4), &field, &ParticleConfig::default());
    let a = cell_to_particle(&first);
    let b = cell_to_particle(&second);
    assert_eq!(classes(&a), classes(&b));
    assert_eq!(a, b);
}

#[test]
fn refinement_keeps_particle_count() {
    let mut rng = SmallRng::seed_from_u64(3);
    let (nx, ny) = (8, 6);
    let pattern: Vec<bool> = (0..nx * ny).map(|_| rng.gen_bool(0.5)).collect();
    let field = coarse_pattern(pattern.clone(), nx, ny);
    let expected = reference_sizes(&pattern, nx, ny);

    let coarse = BoxMesh::rectangle([0.0, 0.0], [1.0, 1.0], [nx, ny]).unwrap();
    let mut uniform = coarse.clone();
    uniform.refine_global(1);
    let mut local = coarse.clone();
    local.refine_where(|r| r.center[1] < 0.5);
    local.refine_where(|r| r.center[0] > 0.5 && r.center[1] < 0.25);

    for mesh in [&coarse, &uniform, &local] {
        let results = identify_on(mesh, 2, x_strips(0.0, 1.0, 2), &field, &ParticleConfig::default());
        assert_eq!(results[0].1.n_particles as usize, expected.len());
        let mut sizes: Vec<usize> = table_of(&results)
            .iter()
            .map(|p| (p.volume * (nx * ny) as f64).round() as usize)
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, expected);
    }
}

#[test]
fn porosity_preset_counts_pores() {
    let mut mesh = BoxMesh::rectangle([0.0, 0.0], [2.0, 1.0], [16, 8]).unwrap();
    mesh.refine_global(1);
    // solid everywhere except two square pores
    let phase = |x: [f64; 3]| {
        let pore = |cx: f64| (x[0] - cx).abs() < 0.25 && (x[1] - 0.5).abs() < 0.25;
        if pore(0.5) || pore(1.5) { 0.05 } else { 0.9 }
    };
    let results = identify_on(&mesh, 2, x_strips(0.0, 2.0, 2), phase, &ParticleConfig::porosity());
    assert_eq!(results[0].1.n_particles, 2);
    for p in table_of(&results).iter() {
        assert!((p.volume - 0.25).abs() < 1e-12);
    }
}

#[test]
fn sphere_in_3d_across_two_ranks() {
    let mut mesh = BoxMesh::cuboid([0.0; 3], [2.0, 1.0, 1.0], [8, 4, 4]).unwrap();
    mesh.refine_global(1);
    let ball = |x: [f64; 3]| {
        let d2 = (x[0] - 1.0).powi(2) + (x[1] - 0.5).powi(2) + (x[2] - 0.5).powi(2);
        if d2 < 0.35 * 0.35 { 1.0 } else { 0.0 }
    };
    let results = identify_on(&mesh, 2, x_strips(0.0, 2.0, 2), ball, &ParticleConfig::default());
    assert_eq!(results[1].1.n_particles, 1);
    let p = table_of(&results).particles[0];
    for (k, c) in [1.0, 0.5, 0.5].into_iter().enumerate() {
        assert!((p.centroid[k] - c).abs() < 1e-12);
    }
    let expected_r = (3.0 * p.volume / (4.0 * std::f64::consts::PI)).cbrt();
    assert!((p.equivalent_radius - expected_r).abs() < 1e-12);
}

#[test]
fn round_cap_reports_non_convergence() {
    // a snake across 4 strips needs several rounds
    let mesh = BoxMesh::interval(0.0, 4.0, 8).unwrap();
    let views = mesh.partition(4, x_strips(0.0, 4.0, 4)).unwrap();
    let cfg = ParticleConfig::default().with_max_rounds(1);
    let errors = run_ranks(4, |c| {
        let mesh = &views[c.rank()];
        let samples = CellSamples::from_fn(mesh, |_| 1.0).unwrap();
        identify_particles(mesh, &samples, &cfg, &c).unwrap_err()
    });
    for e in errors {
        assert!(matches!(e, ParticleError::StitchingDidNotConverge { rounds: 1 }));
        assert_eq!(e.class(), ErrorClass::Communication);
    }
}

#[test]
fn one_rank_failing_fails_every_rank() {
    let mesh = BoxMesh::interval(0.0, 2.0, 8).unwrap();
    let views = mesh.partition(2, x_strips(0.0, 2.0, 2)).unwrap();
    let results = run_ranks(2, |c| {
        let mesh = &views[c.rank()];
        // rank 1 has no samples for its owned cells
        let samples = if c.rank() == 1 {
            CellSamples::new()
        } else {
            CellSamples::from_fn(mesh, |_| 1.0).unwrap()
        };
        identify_particles(mesh, &samples, &ParticleConfig::default(), &c)
    });
    assert!(matches!(results[1], Err(ParticleError::MissingSample(_))));
    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Communication);
    assert!(err.to_string().contains("segmentation"));
}
