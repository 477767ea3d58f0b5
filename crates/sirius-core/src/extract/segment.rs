//! Single-pass raster-scan segmentation.
//!
//! The image is scanned top to bottom, each row left to right. Detected
//! pixels attach to the objects of their already-visited neighbors (W, NW,
//! N, NE); colliding objects merge through a union-find over the
//! provisional table. An object whose root gains no pixel during a row can
//! never grow again and is finalized immediately, so memory tracks the
//! number of *open* objects, not the number of detections.

use crate::error::{Result, SiriusError};
use crate::filter::DetectionInput;
use crate::image::Planes;

use super::object::RawObject;
use super::pixstack::{PixelStack, NONE};

/// Provisional-object table: union-find forest plus a membership ring per
/// set so a finalized set's slots can be reclaimed in one sweep.
struct ObjectTable {
    parent: Vec<u32>,
    rank: Vec<u8>,
    /// Circular membership list; swapping two ring entries concatenates
    /// the cycles of their sets.
    ring: Vec<u32>,
    obj: Vec<RawObject>,
    free: Vec<u32>,
    limit: usize,
}

impl ObjectTable {
    fn new(limit: usize) -> Self {
        Self {
            parent: Vec::new(),
            rank: Vec::new(),
            ring: Vec::new(),
            obj: Vec::new(),
            free: Vec::new(),
            limit,
        }
    }

    fn alloc(&mut self, seed: RawObject) -> Result<u32> {
        if let Some(slot) = self.free.pop() {
            self.parent[slot as usize] = slot;
            self.rank[slot as usize] = 0;
            self.ring[slot as usize] = slot;
            self.obj[slot as usize] = seed;
            return Ok(slot);
        }
        if self.obj.len() >= self.limit {
            return Err(SiriusError::ObjectsLimit { limit: self.limit });
        }
        let slot = self.obj.len() as u32;
        self.parent.push(slot);
        self.rank.push(0);
        self.ring.push(slot);
        self.obj.push(seed);
        Ok(slot)
    }

    fn find(&mut self, mut s: u32) -> u32 {
        // Path halving.
        while self.parent[s as usize] != s {
            let grand = self.parent[self.parent[s as usize] as usize];
            self.parent[s as usize] = grand;
            s = grand;
        }
        s
    }

    /// Union two roots; the surviving root's record absorbs the other's
    /// stats and its pixel chain is spliced onto the survivor's.
    fn union(&mut self, a: u32, b: u32, stack: &mut PixelStack) -> u32 {
        debug_assert_ne!(a, b);
        let (winner, loser) = if self.rank[a as usize] >= self.rank[b as usize] {
            (a, b)
        } else {
            (b, a)
        };
        self.parent[loser as usize] = winner;
        if self.rank[winner as usize] == self.rank[loser as usize] {
            self.rank[winner as usize] += 1;
        }
        self.ring.swap(winner as usize, loser as usize);

        let absorbed = self.obj[loser as usize].clone();
        let survivor = &mut self.obj[winner as usize];
        survivor.merge(&absorbed);
        if absorbed.head != NONE {
            if survivor.head == NONE {
                survivor.head = absorbed.head;
            } else {
                stack.link(survivor.tail, absorbed.head);
            }
            survivor.tail = absorbed.tail;
        }
        winner
    }

    /// Return every slot of `root`'s set to the free list.
    fn release_set(&mut self, root: u32) {
        let mut s = self.ring[root as usize];
        self.free.push(root);
        while s != root {
            self.free.push(s);
            s = self.ring[s as usize];
        }
    }
}

/// Scan the detection plane and hand each finalized object (with its pixel
/// list, raster-ordered) to `on_object`. Objects smaller than `min_area`
/// are dropped silently.
pub(crate) fn scan<F>(
    planes: &Planes,
    det: &DetectionInput,
    min_area: usize,
    pixstack_capacity: usize,
    object_limit: usize,
    mut on_object: F,
) -> Result<()>
where
    F: FnMut(RawObject, Vec<u32>) -> Result<()>,
{
    let (h, w) = planes.data.dim();
    let mut stack = PixelStack::with_capacity(pixstack_capacity);
    let mut table = ObjectTable::new(object_limit);

    // Per-column provisional slot for the previous and current row.
    let mut prev_row: Vec<u32> = vec![NONE; w];
    let mut cur_row: Vec<u32> = vec![NONE; w];
    // Roots that may still gain pixels.
    let mut open: Vec<u32> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            cur_row[x] = NONE;
            if !planes.valid[[y, x]] {
                continue;
            }
            let cval = det.conv[[y, x]];
            if cval <= det.det_thresh.at(y, x) {
                continue;
            }

            // Previously-visited neighbors: W, NW, N, NE.
            let mut target = NONE;
            let neighbors = [
                if x > 0 { cur_row[x - 1] } else { NONE },
                if x > 0 { prev_row[x - 1] } else { NONE },
                prev_row[x],
                if x + 1 < w { prev_row[x + 1] } else { NONE },
            ];
            for n in neighbors {
                if n == NONE {
                    continue;
                }
                let root = table.find(n);
                if target == NONE {
                    target = root;
                } else if root != target {
                    target = table.union(target, root, &mut stack);
                }
            }

            if target == NONE {
                target = table.alloc(RawObject::seed(x, y))?;
                open.push(target);
            }

            let cell = stack.alloc((y * w + x) as u32)?;
            let obj = &mut table.obj[target as usize];
            if obj.head == NONE {
                obj.head = cell;
            } else {
                stack.link(obj.tail, cell);
            }
            obj.tail = cell;
            obj.add_pixel(
                x,
                y,
                cval,
                planes.data[[y, x]],
                det.pix_thresh.at(y, x),
                det.det_thresh.at(y, x),
                w,
                h,
            );
            cur_row[x] = target;
        }

        // Finalize roots that gained nothing in this row.
        finalize_idle(
            &mut table,
            &mut stack,
            &mut open,
            y,
            min_area,
            &mut on_object,
        )?;
        std::mem::swap(&mut prev_row, &mut cur_row);
    }

    // End of image: everything still open is complete.
    finalize_idle(
        &mut table,
        &mut stack,
        &mut open,
        usize::MAX,
        min_area,
        &mut on_object,
    )?;

    Ok(())
}

fn finalize_idle<F>(
    table: &mut ObjectTable,
    stack: &mut PixelStack,
    open: &mut Vec<u32>,
    row: usize,
    min_area: usize,
    on_object: &mut F,
) -> Result<()>
where
    F: FnMut(RawObject, Vec<u32>) -> Result<()>,
{
    let mut i = 0;
    while i < open.len() {
        let slot = open[i];
        // Merged-away slots drop out of the open list; their root is
        // tracked by its own entry.
        if table.parent[slot as usize] != slot {
            open.swap_remove(i);
            continue;
        }
        if row != usize::MAX && table.obj[slot as usize].last_row >= row {
            i += 1;
            continue;
        }

        open.swap_remove(i);
        let obj = table.obj[slot as usize].clone();
        let mut pixels = Vec::with_capacity(obj.npix);
        stack.drain_chain(obj.head, &mut pixels);
        table.release_set(slot);
        if obj.npix >= min_area {
            on_object(obj, pixels)?;
        }
    }
    Ok(())
}
