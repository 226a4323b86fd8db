// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Axis-aligned screen rectangles.
//!
//! Rectangles are the unit of damage tracking and of every framebuffer
//! update on the wire. Fields are `u16` to match the protocol's 16-bit
//! coordinate space.

/// A rectangular screen region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

impl Rectangle {
    /// Creates a rectangle from its corner and dimensions.
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u32 {
        u32::from(self.width) * u32::from(self.height)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        u32::from(self.x) + u32::from(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        u32::from(self.y) + u32::from(self.height)
    }

    /// Intersection of two rectangles. Empty (all zeros) when they are
    /// disjoint.
    pub fn intersect(&self, other: &Rectangle) -> Rectangle {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if u32::from(x1) >= x2 || u32::from(y1) >= y2 {
            return Rectangle::default();
        }
        // Edges fit in u16: both operands' edges did.
        Rectangle {
            x: x1,
            y: y1,
            width: (x2 - u32::from(x1)) as u16,
            height: (y2 - u32::from(y1)) as u16,
        }
    }

    /// Smallest rectangle containing both operands. An empty operand does
    /// not grow the result.
    pub fn union(&self, other: &Rectangle) -> Rectangle {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rectangle {
            x: x1,
            y: y1,
            width: (x2 - u32::from(x1)) as u16,
            height: (y2 - u32::from(y1)) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_area() {
        assert!(Rectangle::new(5, 5, 0, 10).is_empty());
        assert!(Rectangle::new(5, 5, 10, 0).is_empty());
        assert!(!Rectangle::new(0, 0, 1, 1).is_empty());
        assert_eq!(Rectangle::new(0, 0, 320, 200).area(), 64_000);
    }

    #[test]
    fn intersect_overlapping() {
        let a = Rectangle::new(0, 0, 100, 100);
        let b = Rectangle::new(50, 50, 100, 100);
        assert_eq!(a.intersect(&b), Rectangle::new(50, 50, 50, 50));
        assert_eq!(b.intersect(&a), Rectangle::new(50, 50, 50, 50));
    }

    #[test]
    fn intersect_disjoint_is_empty() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(20, 20, 10, 10);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn union_covers_both() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(30, 5, 10, 20);
        let u = a.union(&b);
        assert_eq!(u, Rectangle::new(0, 0, 40, 25));
        assert_eq!(u.union(&Rectangle::default()), u);
        assert_eq!(Rectangle::default().union(&a), a);
    }
}
