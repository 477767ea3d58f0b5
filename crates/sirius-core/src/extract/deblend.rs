//! Multi-threshold deblending of merged detections.
//!
//! Each finalized object is re-segmented at a geometric ladder of
//! thresholds between its detection threshold and its peak. Components
//! appearing at higher rungs form a tree; branches carrying enough flux
//! relative to the whole object are promoted to separate detections and
//! the remaining low pixels are parcelled out by a Gaussian membership
//! weight.

use std::collections::HashMap;

use crate::consts::{EPSILON, MOMENT_DET_MIN, MOMENT_FLOOR};
use crate::error::{Result, SiriusError};
use crate::filter::DetectionInput;
use crate::flags::OBJ_MERGED;
use crate::image::Planes;

use super::object::RawObject;

const NO_NODE: u32 = u32::MAX;

/// One node of the deblend tree: a connected component at some rung,
/// linked into an id arena through parent / first-child / next-sibling.
struct Node {
    level: usize,
    parent: u32,
    first_child: u32,
    next_sibling: u32,
    /// Member pixels as indices into the object's local pixel list.
    pixels: Vec<u32>,
    /// Integrated detection-plane flux of the members.
    flux: f64,
    significant: bool,
}

/// Deblend one finalized object. Returns either the object unchanged or
/// the promoted branches, each with its own pixel list.
pub(crate) fn deblend(
    obj: RawObject,
    pixels: Vec<u32>,
    planes: &Planes,
    det: &DetectionInput,
    nthresh: usize,
    cont: f64,
    sub_limit: usize,
) -> Result<Vec<(RawObject, Vec<u32>)>> {
    let t0 = obj.dthresh as f64;
    let peak = obj.cpeak as f64;
    if nthresh < 2 || t0 <= 0.0 || peak <= t0 {
        return Ok(vec![(obj, pixels)]);
    }

    let (h, w) = planes.data.dim();
    let n = pixels.len();

    // Local coordinate tables for the member pixels.
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    let mut cvals = Vec::with_capacity(n);
    let mut local_of: HashMap<u32, u32> = HashMap::with_capacity(n);
    for (i, &p) in pixels.iter().enumerate() {
        let x = p as usize % w;
        let y = p as usize / w;
        xs.push(x);
        ys.push(y);
        cvals.push(det.conv[[y, x]]);
        local_of.insert(p, i as u32);
    }

    let mut nodes: Vec<Node> = vec![Node {
        level: 0,
        parent: NO_NODE,
        first_child: NO_NODE,
        next_sibling: NO_NODE,
        pixels: (0..n as u32).collect(),
        flux: obj.sum_v,
        significant: false,
    }];
    // Deepest node currently owning each local pixel.
    let mut owner: Vec<u32> = vec![0; n];

    // Scratch union-find over local ids, rebuilt per rung.
    let mut uf: Vec<u32> = vec![0; n];
    let ratio = peak / t0;

    for k in 1..nthresh {
        let t = (t0 * ratio.powf(k as f64 / nthresh as f64)) as f32;

        for i in 0..n {
            uf[i] = if cvals[i] > t { i as u32 } else { NO_NODE };
        }
        for i in 0..n {
            if uf[i] == NO_NODE {
                continue;
            }
            let x = xs[i] as isize;
            let y = ys[i] as isize;
            // Each 8-adjacency appears exactly once when every pixel
            // checks its four lexicographically-smaller neighbors.
            for (dx, dy) in [(-1, -1), (0, -1), (1, -1), (-1, 0)] {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let Some(&j) = local_of.get(&((ny as usize * w + nx as usize) as u32)) else {
                    continue;
                };
                if uf[j as usize] == NO_NODE {
                    continue;
                }
                let ri = uf_find(&mut uf, i as u32);
                let rj = uf_find(&mut uf, j);
                if ri != rj {
                    uf[ri.max(rj) as usize] = ri.min(rj);
                }
            }
        }

        // Gather components in first-pixel order.
        let mut comp_node: HashMap<u32, u32> = HashMap::new();
        for i in 0..n {
            if uf[i] == NO_NODE {
                continue;
            }
            let root = uf_find(&mut uf, i as u32);
            let node_id = match comp_node.get(&root) {
                Some(&id) => id,
                None => {
                    if nodes.len() >= sub_limit {
                        return Err(SiriusError::DeblendOverflow { limit: sub_limit });
                    }
                    let parent = owner[i];
                    let id = nodes.len() as u32;
                    let elder = nodes[parent as usize].first_child;
                    nodes.push(Node {
                        level: k,
                        parent,
                        first_child: NO_NODE,
                        next_sibling: elder,
                        pixels: Vec::new(),
                        flux: 0.0,
                        significant: false,
                    });
                    nodes[parent as usize].first_child = id;
                    comp_node.insert(root, id);
                    id
                }
            };
            nodes[node_id as usize].pixels.push(i as u32);
            nodes[node_id as usize].flux += cvals[i] as f64;
            owner[i] = node_id;
        }
    }

    // A branch is significant when it carries enough of the parent flux
    // and persists past its birth rung (or was born at the last rung).
    let min_flux = cont * obj.sum_v;
    for id in 1..nodes.len() {
        let persists = nodes[id].first_child != NO_NODE || nodes[id].level == nthresh - 1;
        nodes[id].significant = persists && nodes[id].flux >= min_flux;
    }

    let mut branches: Vec<u32> = Vec::new();
    resolve(&nodes, 0, &mut branches);
    if branches.len() < 2 {
        return Ok(vec![(obj, pixels)]);
    }

    // Parcel out unclaimed parent pixels by Gaussian membership weight.
    let mut assignment: Vec<u32> = vec![NO_NODE; n];
    for (b, &node_id) in branches.iter().enumerate() {
        for &i in &nodes[node_id as usize].pixels {
            assignment[i as usize] = b as u32;
        }
    }
    let models: Vec<BranchModel> = branches
        .iter()
        .map(|&id| BranchModel::fit(&nodes[id as usize], &xs, &ys, &cvals))
        .collect();
    for i in 0..n {
        if assignment[i] != NO_NODE {
            continue;
        }
        let mut best = 0u32;
        let mut best_w = f64::NEG_INFINITY;
        for (b, model) in models.iter().enumerate() {
            let weight = model.log_weight(xs[i] as f64, ys[i] as f64);
            if weight > best_w {
                best_w = weight;
                best = b as u32;
            }
        }
        assignment[i] = best;
    }

    let mut out = Vec::with_capacity(branches.len());
    for b in 0..branches.len() as u32 {
        let mut member: Vec<u32> = (0..n)
            .filter(|&i| assignment[i] == b)
            .map(|i| pixels[i])
            .collect();
        member.sort_unstable();
        let mut child = RawObject::from_pixels(
            &member,
            &det.conv,
            &planes.data,
            &det.pix_thresh,
            &det.det_thresh,
            w,
            h,
        );
        // TRUNC is recomputed per child from its own pixels; only the
        // deblending provenance is inherited.
        child.flag |= OBJ_MERGED;
        out.push((child, member));
    }
    Ok(out)
}

/// Walk the tree looking for rungs with at least two significant branches.
/// Returns true when the subtree emitted branches of its own.
fn resolve(nodes: &[Node], id: u32, out: &mut Vec<u32>) -> bool {
    let mut sig: Vec<u32> = Vec::new();
    let mut c = nodes[id as usize].first_child;
    while c != NO_NODE {
        if nodes[c as usize].significant {
            sig.push(c);
        }
        c = nodes[c as usize].next_sibling;
    }
    // Sibling chains are head-inserted; restore rung discovery order.
    sig.reverse();

    match sig.len() {
        0 => false,
        1 => resolve(nodes, sig[0], out),
        _ => {
            for s in sig {
                if !resolve(nodes, s, out) {
                    out.push(s);
                }
            }
            true
        }
    }
}

fn uf_find(uf: &mut [u32], mut i: u32) -> u32 {
    while uf[i as usize] != i {
        let up = uf[uf[i as usize] as usize];
        uf[i as usize] = up;
        i = up;
    }
    i
}

/// Bivariate Gaussian fitted to a branch's pixels, used to weight the
/// parcelling of low pixels.
struct BranchModel {
    mx: f64,
    my: f64,
    /// Inverse covariance entries scaled by the determinant.
    ixx: f64,
    iyy: f64,
    ixy: f64,
    det: f64,
    log_amp: f64,
}

impl BranchModel {
    fn fit(node: &Node, xs: &[usize], ys: &[usize], cvals: &[f32]) -> Self {
        let mut sv = 0.0f64;
        let mut svx = 0.0f64;
        let mut svy = 0.0f64;
        let mut svxx = 0.0f64;
        let mut svyy = 0.0f64;
        let mut svxy = 0.0f64;
        for &i in &node.pixels {
            let v = cvals[i as usize] as f64;
            let x = xs[i as usize] as f64;
            let y = ys[i as usize] as f64;
            sv += v;
            svx += v * x;
            svy += v * y;
            svxx += v * x * x;
            svyy += v * y * y;
            svxy += v * x * y;
        }
        let sv = if sv.abs() <= EPSILON { EPSILON } else { sv };
        let mx = svx / sv;
        let my = svy / sv;
        let mut x2 = svxx / sv - mx * mx;
        let mut y2 = svyy / sv - my * my;
        let xy = svxy / sv - mx * my;
        let mut det = x2 * y2 - xy * xy;
        if x2 < MOMENT_FLOOR || y2 < MOMENT_FLOOR || det < MOMENT_DET_MIN {
            x2 += MOMENT_FLOOR;
            y2 += MOMENT_FLOOR;
            det = x2 * y2 - xy * xy;
        }
        Self {
            mx,
            my,
            ixx: y2,
            iyy: x2,
            ixy: xy,
            det,
            log_amp: (node.flux.max(EPSILON) / (2.0 * std::f64::consts::PI * det.sqrt())).ln(),
        }
    }

    /// Log of the expected branch flux at (x, y); log keeps far pixels
    /// comparable instead of underflowing to a flat zero.
    fn log_weight(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.mx;
        let dy = y - self.my;
        let maha2 = (self.ixx * dx * dx - 2.0 * self.ixy * dx * dy + self.iyy * dy * dy) / self.det;
        self.log_amp - 0.5 * maha2
    }
}
