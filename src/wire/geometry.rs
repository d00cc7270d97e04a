//! Screen geometry shared by orders, caches and sinks.

use serde::{Deserialize, Serialize};

/// Rectangle in screen coordinates: origin plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub cx: u16,
    pub cy: u16,
}

impl Rect {
    pub const fn new(x: i16, y: i16, cx: u16, cy: u16) -> Self {
        Self { x, y, cx, cy }
    }

    /// Rectangle from inclusive edges, as carried by order bounds.
    pub fn from_edges(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        let cx = (i32::from(right) - i32::from(left) + 1).max(0) as u16;
        let cy = (i32::from(bottom) - i32::from(top) + 1).max(0) as u16;
        Self::new(left, top, cx, cy)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cx == 0 || self.cy == 0
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> i32 {
        i32::from(self.x) + i32::from(self.cx)
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> i32 {
        i32::from(self.y) + i32::from(self.cy)
    }

    /// Inclusive edges `(left, top, right, bottom)`.
    pub fn edges(&self) -> (i16, i16, i16, i16) {
        (
            self.x,
            self.y,
            (self.right() - 1) as i16,
            (self.bottom() - 1) as i16,
        )
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = i32::from(self.x).max(i32::from(other.x));
        let top = i32::from(self.y).max(i32::from(other.y));
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Rect::new(left as i16, top as i16, 0, 0);
        }
        Rect::new(
            left as i16,
            top as i16,
            (right - left) as u16,
            (bottom - top) as u16,
        )
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_round_trip() {
        let r = Rect::from_edges(10, 20, 19, 39);
        assert_eq!(r, Rect::new(10, 20, 10, 20));
        assert_eq!(r.edges(), (10, 20, 19, 39));
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 5, 5);
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&Rect::new(5, 5, 10, 10)), Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn test_inverted_edges_clamp_to_empty() {
        assert!(Rect::from_edges(10, 10, 5, 5).is_empty());
    }
}
