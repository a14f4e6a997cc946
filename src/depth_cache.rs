//! Per pixel memo of renderer depth queries for a single capture.

/// Marks a pixel whose depth has not been read from the renderer yet. Renderer depths are always
/// non-negative.
pub const UNSAMPLED: f32 = -1.0;

/// Depth values sampled so far in the current capture, indexed by window pixel.
///
/// The buffer is kept between captures to avoid reallocating it, but every entry is reset by
/// [DepthCache::reset] before a capture starts.
#[derive(Debug, Clone, Default)]
pub struct DepthCache {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DepthCache {
    pub fn new() -> Self {
        DepthCache::default()
    }

    /// Size of the buffer as `(width, height)`.
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Mark every pixel unsampled, reallocating if the window size changed. Returns true if the
    /// buffer was reallocated.
    pub fn reset(&mut self, width: usize, height: usize) -> bool {
        if self.size() != (width, height) || self.data.len() != width * height {
            self.width = width;
            self.height = height;
            self.data = vec![UNSAMPLED; width * height];
            true
        } else {
            for d in self.data.iter_mut() {
                *d = UNSAMPLED;
            }
            false
        }
    }

    /// Cached depth at `(x, y)`. Calls `sample` to populate the entry if it has not been read yet.
    pub fn get_or_sample<F>(&mut self, x: usize, y: usize, sample: F) -> f32
    where
        F: FnOnce() -> f32,
    {
        let d = &mut self.data[y * self.width + x];
        if *d < 0.0 {
            *d = sample();
        }
        *d
    }

    /// Cached depth at `(x, y)` if it has been sampled.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.data
            .get(y * self.width + x)
            .copied()
            .filter(|d| *d >= 0.0)
    }
}

#[test]
fn test_reset_reallocates_on_resize() {
    let mut cache = DepthCache::new();
    assert!(cache.reset(10, 8));
    assert_eq!(cache.size(), (10, 8));
    assert!(!cache.reset(10, 8));
    assert!(cache.reset(8, 10));
    assert_eq!(cache.size(), (8, 10));
}

#[test]
fn test_get_or_sample_samples_once() {
    let mut cache = DepthCache::new();
    cache.reset(4, 4);
    let mut calls = 0;
    let a = cache.get_or_sample(1, 2, || {
        calls += 1;
        0.25
    });
    let b = cache.get_or_sample(1, 2, || {
        calls += 1;
        0.75
    });
    assert_eq!(a, 0.25);
    assert_eq!(b, 0.25);
    assert_eq!(calls, 1);
    assert_eq!(cache.get(1, 2), Some(0.25));
    assert_eq!(cache.get(2, 1), None);
}

#[test]
fn test_reset_forgets_samples() {
    let mut cache = DepthCache::new();
    cache.reset(4, 4);
    cache.get_or_sample(3, 3, || 0.5);
    cache.reset(4, 4);
    assert_eq!(cache.get(3, 3), None);
    assert_eq!(cache.get_or_sample(3, 3, || 1.0), 1.0);
}
