use anyhow::{bail, Error};
use fxhash::FxHashSet;
use log::debug;
use ndarray::ArrayView2;
use noisy_float::prelude::*;
use rayon::prelude::*;
use vpsearch::{BestCandidate, MetricSpace, Tree};

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Clone, Debug)]
struct Cell(Vec<f64>);

impl MetricSpace for Cell {
    type UserData = ();
    type Distance = N64;

    fn distance(&self, other: &Self, _: &()) -> N64 {
        n64(sq_dist(&self.0, &other.0).sqrt())
    }
}

/// The `k` closest candidates seen so far, sorted by distance then index
struct Neighborhood {
    k: usize,
    radius: N64,
    found: Vec<(N64, usize)>,
}

impl Neighborhood {
    fn new(k: usize) -> Self {
        Neighborhood {
            k,
            radius: n64(f64::INFINITY),
            found: Vec::with_capacity(k + 1),
        }
    }

    fn clear(&mut self) {
        self.radius = n64(f64::INFINITY);
        self.found.clear();
    }

    fn insert(&mut self, index: usize, distance: N64) {
        let val = (distance, index);
        let pos = self.found.binary_search(&val).unwrap_or_else(|x| x);
        self.found.insert(pos, val);
        self.found.truncate(self.k);
        if self.found.len() == self.k {
            if let Some(&(d, _)) = self.found.last() {
                self.radius = d;
            }
        }
    }
}

impl<'a> BestCandidate<Cell, ()> for &'a mut Neighborhood {
    type Output = std::iter::Cloned<std::slice::Iter<'a, (N64, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Cell, distance: N64, candidate_index: usize, _: &()) {
        if self.k == 0 {
            return;
        }
        if distance <= self.radius || self.found.len() < self.k {
            self.insert(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> N64 {
        self.radius
    }

    fn result(self, _: &()) -> Self::Output {
        self.found.as_slice().iter().cloned()
    }
}

/// For every row of `query`, the indices of its `k` nearest rows of `reference` by Euclidean
/// distance, closest first. Ties resolve to the lower index. Fails on non-finite input.
pub fn knn(reference: &ArrayView2<f64>, query: &ArrayView2<f64>, k: usize) -> Result<Vec<Vec<usize>>, Error> {
    if reference.iter().chain(query.iter()).any(|v| !v.is_finite()) {
        bail!("nearest-neighbour search needs finite coordinates");
    }
    let k = k.min(reference.nrows());
    if k == 0 {
        return Ok(vec![Vec::new(); query.nrows()]);
    }

    let cells: Vec<Cell> = reference.rows().into_iter().map(|r| Cell(r.to_vec())).collect();
    debug!("building vantage-point tree over {} cells", cells.len());
    let tree = Tree::new(&cells);

    let found: Vec<Vec<usize>> = (0..query.nrows())
        .into_par_iter()
        .map_init(
            || Neighborhood::new(k),
            |neighborhood, i| {
                neighborhood.clear();
                let needle = Cell(query.row(i).to_vec());
                tree.find_nearest_custom(&needle, &(), &mut *neighborhood)
                    .map(|(_, j)| j)
                    .collect::<Vec<usize>>()
            },
        )
        .collect();
    Ok(found)
}

/// Mutual nearest neighbours between the rows of `a` and `b`: pairs `(i, j)` where `b[j]` is
/// among the `k` nearest of `a[i]` and `a[i]` among the `k` nearest of `b[j]`. Sorted by `i`.
pub fn mutual_nn(a: &ArrayView2<f64>, b: &ArrayView2<f64>, k: usize) -> Result<Vec<(usize, usize)>, Error> {
    let a_to_b = knn(b, a, k)?;
    let b_to_a = knn(a, b, k)?;

    let reverse: FxHashSet<(usize, usize)> = b_to_a
        .iter()
        .enumerate()
        .flat_map(|(j, nbrs)| nbrs.iter().map(move |&i| (i, j)))
        .collect();

    let pairs: Vec<(usize, usize)> = a_to_b
        .iter()
        .enumerate()
        .flat_map(|(i, nbrs)| nbrs.iter().map(move |&j| (i, j)))
        .filter(|p| reverse.contains(p))
        .collect();
    debug!("found {} mutual nearest neighbour pairs", pairs.len());
    Ok(pairs)
}
