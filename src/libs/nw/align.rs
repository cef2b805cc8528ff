use crate::libs::base::INSERTION;
use std::ops::RangeInclusive;

/// Score of an unreachable state. Far enough from `i32::MIN` that adding
/// penalties never wraps.
pub const NEG_INF: i32 = i32::MIN / 4;
const UNREACHABLE: i32 = NEG_INF / 2;

const TRACKS: usize = 7;

/// DP tracks. Each cell keeps the best score of an alignment whose last
/// column belongs to the track, and the track of the column before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    /// Both sequences consume a base
    M,
    /// Only sequence 1 consumes a base, paid gap
    X,
    /// Only sequence 2 consumes a base, paid gap
    Y,
    /// Leading bases of sequence 1 skipped for free
    PrefixX,
    /// Leading bases of sequence 2 skipped for free
    PrefixY,
    /// Trailing bases of sequence 1 skipped for free
    SuffixX,
    /// Trailing bases of sequence 2 skipped for free
    SuffixY,
}

impl Track {
    fn consumes_seq1(self) -> bool {
        matches!(self, Track::M | Track::X | Track::PrefixX | Track::SuffixX)
    }

    fn consumes_seq2(self) -> bool {
        matches!(self, Track::M | Track::Y | Track::PrefixY | Track::SuffixY)
    }
}

/// Which ends of which sequence may be left unaligned at no cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeEnds {
    pub seq1_prefix: bool,
    pub seq2_prefix: bool,
    pub seq1_suffix: bool,
    pub seq2_suffix: bool,
}

impl FreeEnds {
    pub const NONE: FreeEnds = FreeEnds {
        seq1_prefix: false,
        seq2_prefix: false,
        seq1_suffix: false,
        seq2_suffix: false,
    };

    /// Leading gaps on both sequences are free.
    pub fn prefixes() -> Self {
        Self {
            seq1_prefix: true,
            seq2_prefix: true,
            ..Self::NONE
        }
    }

    /// Trailing gaps on both sequences are free.
    pub fn suffixes() -> Self {
        Self {
            seq1_suffix: true,
            seq2_suffix: true,
            ..Self::NONE
        }
    }

    pub fn allows(&self, track: Track) -> bool {
        match track {
            Track::M | Track::X | Track::Y => true,
            Track::PrefixX => self.seq1_prefix,
            Track::PrefixY => self.seq2_prefix,
            Track::SuffixX => self.seq1_suffix,
            Track::SuffixY => self.seq2_suffix,
        }
    }
}

/// Affine gap cost: a run of `k` gaps adds `open + (k - 1) * extend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapPenalty {
    pub open: i32,
    pub extend: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignParams {
    pub gap: GapPenalty,
    pub free_ends: FreeEnds,
    /// Upper bound of the substitution score; banded runs use it to prove
    /// that no path outside the band can win.
    pub ceiling: i32,
}

/// An alignment of two sequences. Dropping the `None`s of either side gives
/// back the corresponding input.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment<T> {
    pub score: i32,
    pub path: Vec<(Option<T>, Option<T>)>,
}

impl<T: Clone> Alignment<T> {
    pub fn seq1(&self) -> Vec<T> {
        self.path.iter().filter_map(|(a, _)| a.clone()).collect()
    }

    pub fn seq2(&self) -> Vec<T> {
        self.path.iter().filter_map(|(_, b)| b.clone()).collect()
    }

    /// Columns where both sequences contribute.
    pub fn paired(&self) -> usize {
        self.path
            .iter()
            .filter(|(a, b)| a.is_some() && b.is_some())
            .count()
    }

    /// Columns where only one sequence contributes.
    pub fn gaps(&self) -> usize {
        self.path.len() - self.paired()
    }

    /// Two flat rows with [`INSERTION`] where a side is absent.
    pub fn render<F>(&self, symbol: F) -> (Vec<u8>, Vec<u8>)
    where
        F: Fn(&T) -> u8,
    {
        self.path
            .iter()
            .map(|(a, b)| {
                (
                    a.as_ref().map_or(INSERTION, &symbol),
                    b.as_ref().map_or(INSERTION, &symbol),
                )
            })
            .unzip()
    }
}

/// Diagonal band `lo <= r - c <= hi`. A side of the band restricts the
/// search only when it cuts into the matrix.
#[derive(Debug, Clone, Copy)]
struct Band {
    lo: isize,
    hi: isize,
    restrict_lo: bool,
    restrict_hi: bool,
    rows: usize,
    cols: usize,
}

impl Band {
    fn new(rows: usize, cols: usize, width: Option<usize>) -> Self {
        let (n, m) = (rows as isize, cols as isize);
        match width {
            None => Self {
                lo: -m,
                hi: n,
                restrict_lo: false,
                restrict_hi: false,
                rows,
                cols,
            },
            Some(w) => {
                // Span every diagonal between the start cell and the end cell
                let w = w as isize;
                let lo = (n - m).min(0) - w;
                let hi = (n - m).max(0) + w;
                Self {
                    lo: lo.max(-m),
                    hi: hi.min(n),
                    restrict_lo: lo > -m,
                    restrict_hi: hi < n,
                    rows,
                    cols,
                }
            }
        }
    }

    fn is_full(&self) -> bool {
        !self.restrict_lo && !self.restrict_hi
    }

    fn contains(&self, r: usize, c: usize) -> bool {
        let d = r as isize - c as isize;
        r <= self.rows && c <= self.cols && d >= self.lo && d <= self.hi
    }

    fn columns(&self, r: usize) -> RangeInclusive<usize> {
        let r = r as isize;
        let start = (r - self.hi).max(0) as usize;
        let end = (r - self.lo).min(self.cols as isize) as usize;
        start..=end
    }

    fn on_edge(&self, r: usize, c: usize) -> bool {
        let d = r as isize - c as isize;
        (self.restrict_lo && d == self.lo) || (self.restrict_hi && d == self.hi)
    }

    /// Cells lying on a restricting side of the band, in row order.
    fn edge_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..=self.rows).flat_map(move |r| {
            let lo_edge = (r as isize - self.lo) as usize;
            let hi_edge = r as isize - self.hi;
            let lo = (self.restrict_lo && lo_edge <= self.cols).then_some((r, lo_edge));
            let hi = (self.restrict_hi && hi_edge >= 0 && hi_edge as usize <= self.cols)
                .then(|| (r, hi_edge as usize));
            lo.into_iter().chain(hi)
        })
    }
}

fn pick(candidates: &[(Track, i32)]) -> (i32, Option<Track>) {
    let mut best = (NEG_INF, None);
    for &(track, score) in candidates {
        if score > UNREACHABLE && score > best.0 {
            best = (score, Some(track));
        }
    }
    best
}

/// Affine-gap Needleman-Wunsch aligner with independent free-end switches.
///
/// The score and trace matrices are scratch space owned by the instance.
/// They grow to the next power of two of the cell count and never shrink, so
/// one long-lived `Aligner` per thread amortizes allocation. The buffers are
/// mutated by every call; do not share an instance between threads.
#[derive(Debug, Default)]
pub struct Aligner {
    scores: [Vec<i32>; TRACKS],
    trace: [Vec<Option<Track>>; TRACKS],
}

impl Aligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells the scratch buffers can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.scores[0].len()
    }

    fn reserve(&mut self, cells: usize) {
        if cells <= self.capacity() {
            return;
        }
        let size = cells.next_power_of_two();
        for v in self.scores.iter_mut() {
            v.resize(size, NEG_INF);
        }
        for v in self.trace.iter_mut() {
            v.resize(size, None);
        }
    }

    #[inline]
    fn get(&self, band: &Band, track: Track, r: usize, c: usize) -> i32 {
        if band.contains(r, c) {
            self.scores[track as usize][r * (band.cols + 1) + c]
        } else {
            NEG_INF
        }
    }

    /// Optimal alignment over the full matrix.
    pub fn align<T, F>(&mut self, seq1: &[T], seq2: &[T], score: F, params: &AlignParams) -> Alignment<T>
    where
        T: Clone,
        F: Fn(&T, &T) -> i32,
    {
        match self.run(seq1, seq2, &score, params, None) {
            Some(alignment) => alignment,
            None => unreachable!("an unbanded alignment cannot leave its band"),
        }
    }

    /// Alignment restricted to `width` diagonals on either side of the
    /// start-to-end diagonals. `None` means the band was too narrow to
    /// guarantee the optimum; retry with a wider one.
    pub fn align_banded<T, F>(
        &mut self,
        seq1: &[T],
        seq2: &[T],
        score: F,
        params: &AlignParams,
        width: usize,
    ) -> Option<Alignment<T>>
    where
        T: Clone,
        F: Fn(&T, &T) -> i32,
    {
        self.run(seq1, seq2, &score, params, Some(width))
    }

    /// Banded alignment starting at width 1 and doubling until the band is
    /// sufficient. Same score as [`Aligner::align`], usually at a fraction
    /// of the cost.
    pub fn approx_align<T, F>(
        &mut self,
        seq1: &[T],
        seq2: &[T],
        score: F,
        params: &AlignParams,
    ) -> Alignment<T>
    where
        T: Clone,
        F: Fn(&T, &T) -> i32,
    {
        let limit = seq1.len().max(seq2.len());
        let mut width = 1;
        loop {
            if width >= limit {
                return self.align(seq1, seq2, &score, params);
            }
            if let Some(alignment) = self.align_banded(seq1, seq2, &score, params, width) {
                return alignment;
            }
            width *= 2;
        }
    }

    fn run<T, F>(
        &mut self,
        seq1: &[T],
        seq2: &[T],
        score: &F,
        params: &AlignParams,
        width: Option<usize>,
    ) -> Option<Alignment<T>>
    where
        T: Clone,
        F: Fn(&T, &T) -> i32,
    {
        let (n, m) = (seq1.len(), seq2.len());
        let band = Band::new(n, m, width);
        self.reserve((n + 1) * (m + 1));
        self.fill(seq1, seq2, score, params, &band);

        let (total, winner) = self.finish(n, m, params);
        if !band.is_full() && !self.band_certified(&band, n, m, total, params.ceiling) {
            return None;
        }

        let path = self.traceback(seq1, seq2, &band, params.free_ends, winner)?;
        Some(Alignment { score: total, path })
    }

    fn fill<T, F>(&mut self, seq1: &[T], seq2: &[T], score: &F, params: &AlignParams, band: &Band)
    where
        F: Fn(&T, &T) -> i32,
    {
        use Track::*;

        let (n, m) = (seq1.len(), seq2.len());
        let gap = params.gap;
        let free = params.free_ends;

        for r in 0..=n {
            for c in band.columns(r) {
                let mut cell = [(NEG_INF, None); TRACKS];

                if r == 0 && c == 0 {
                    cell[M as usize] = (0, None);
                }

                if r > 0 && c > 0 {
                    let s = score(&seq1[r - 1], &seq2[c - 1]);
                    let at = |t| self.get(band, t, r - 1, c - 1) + s;
                    cell[M as usize] = pick(&[
                        (M, at(M)),
                        (X, at(X)),
                        (Y, at(Y)),
                        (PrefixX, at(PrefixX)),
                        (PrefixY, at(PrefixY)),
                    ]);
                }

                if r > 0 {
                    let at = |t| self.get(band, t, r - 1, c);
                    cell[X as usize] = pick(&[
                        (M, at(M) + gap.open),
                        (X, at(X) + gap.extend),
                        (Y, at(Y) + gap.open),
                        (PrefixY, at(PrefixY) + gap.open),
                    ]);
                    if free.seq1_prefix && c == 0 {
                        cell[PrefixX as usize] = pick(&[(M, at(M)), (PrefixX, at(PrefixX))]);
                    }
                    if free.seq1_suffix && c == m {
                        // A free lead on seq2 may run straight into a free tail on seq1
                        cell[SuffixX as usize] = pick(&[
                            (M, at(M)),
                            (Y, at(Y)),
                            (SuffixX, at(SuffixX)),
                            (PrefixY, at(PrefixY)),
                        ]);
                    }
                }

                if c > 0 {
                    let at = |t| self.get(band, t, r, c - 1);
                    cell[Y as usize] = pick(&[
                        (M, at(M) + gap.open),
                        (Y, at(Y) + gap.extend),
                        (X, at(X) + gap.open),
                        (PrefixX, at(PrefixX) + gap.open),
                    ]);
                    if free.seq2_prefix && r == 0 {
                        cell[PrefixY as usize] = pick(&[(M, at(M)), (PrefixY, at(PrefixY))]);
                    }
                    if free.seq2_suffix && r == n {
                        cell[SuffixY as usize] = pick(&[
                            (M, at(M)),
                            (X, at(X)),
                            (SuffixY, at(SuffixY)),
                            (PrefixX, at(PrefixX)),
                        ]);
                    }
                }

                let idx = r * (m + 1) + c;
                for (t, (s, tag)) in cell.into_iter().enumerate() {
                    self.scores[t][idx] = s;
                    self.trace[t][idx] = tag;
                }
            }
        }
    }

    /// Best end state at the last cell, among the tracks enabled for this call.
    fn finish(&self, n: usize, m: usize, params: &AlignParams) -> (i32, Track) {
        let free = params.free_ends;
        let idx = n * (m + 1) + m;
        let candidates: Vec<(Track, i32)> = [
            Track::M,
            Track::X,
            Track::Y,
            Track::SuffixX,
            Track::SuffixY,
            Track::PrefixX,
            Track::PrefixY,
        ]
        .into_iter()
        .filter(|&t| free.allows(t))
        .map(|t| (t, self.scores[t as usize][idx]))
        .collect();

        match pick(&candidates) {
            (score, Some(track)) => (score, track),
            (_, None) => panic!("no reachable end state at ({}, {})", n, m),
        }
    }

    /// Every path that leaves the band passes through a cell on a restricting
    /// edge. Bound what such a path could still gain from there on.
    fn band_certified(&self, band: &Band, n: usize, m: usize, total: i32, ceiling: i32) -> bool {
        let gain = ceiling.max(0);
        band.edge_cells().all(|(r, c)| {
            let idx = r * (m + 1) + c;
            let best = self.scores.iter().map(|v| v[idx]).max().unwrap_or(NEG_INF);
            best <= UNREACHABLE || best + gain * (n - r).min(m - c) as i32 <= total
        })
    }

    fn traceback<T: Clone>(
        &self,
        seq1: &[T],
        seq2: &[T],
        band: &Band,
        free: FreeEnds,
        winner: Track,
    ) -> Option<Vec<(Option<T>, Option<T>)>> {
        let width = seq2.len() + 1;
        let mut path = Vec::with_capacity(seq1.len() + seq2.len());
        let (mut r, mut c, mut track) = (seq1.len(), seq2.len(), winner);

        while r > 0 || c > 0 {
            if band.on_edge(r, c) {
                return None;
            }
            if !free.allows(track) {
                panic!(
                    "traceback entered the disabled {:?} track at ({}, {})",
                    track, r, c
                );
            }
            let prev = match self.trace[track as usize][r * width + c] {
                Some(prev) => prev,
                None => panic!("null predecessor on the {:?} track at ({}, {})", track, r, c),
            };

            match (track.consumes_seq1(), track.consumes_seq2()) {
                (true, true) => {
                    path.push((Some(seq1[r - 1].clone()), Some(seq2[c - 1].clone())));
                    r -= 1;
                    c -= 1;
                }
                (true, false) => {
                    path.push((Some(seq1[r - 1].clone()), None));
                    r -= 1;
                }
                _ => {
                    path.push((None, Some(seq2[c - 1].clone())));
                    c -= 1;
                }
            }
            track = prev;
        }

        path.reverse();
        Some(path)
    }
}
