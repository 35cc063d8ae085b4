//! Size profiles and the shared fit/crop arithmetic used to match them.
//!
//! The matcher and the rendering backend must agree on what a profile
//! produces for a given source, so the arithmetic lives here and both go
//! through it.

/// A configured derivative size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeProfile {
    /// Unique profile name, e.g. "thumbnail".
    pub name: String,

    /// Target width in pixels. 0 means unbounded for fit profiles.
    pub width: u32,

    /// Target height in pixels. 0 means unbounded for fit profiles.
    pub height: u32,

    /// Fill the target box exactly instead of fitting within it.
    pub crop: bool,
}

impl SizeProfile {
    pub fn new(name: impl Into<String>, width: u32, height: u32, crop: bool) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            crop,
        }
    }

    /// Output dimensions this profile would produce from a source image.
    ///
    /// `None` when the profile cannot apply: zero source dimensions, zero
    /// crop targets, both fit bounds zero, or a result that leaves the
    /// dimensions unchanged. An unchanged result means there is nothing to
    /// generate, so such a profile can never match a derivative request.
    pub fn resize_result(&self, source_w: u32, source_h: u32) -> Option<(u32, u32)> {
        if source_w == 0 || source_h == 0 {
            return None;
        }

        let (w, h) = if self.crop {
            if self.width == 0 || self.height == 0 {
                return None;
            }
            (self.width, self.height)
        } else {
            if self.width == 0 && self.height == 0 {
                return None;
            }
            constrain_dimensions(source_w, source_h, self.width, self.height)
        };

        if w == source_w && h == source_h {
            return None;
        }

        Some((w, h))
    }
}

/// Largest dimensions that fit within `max_w` x `max_h` while preserving
/// the source aspect ratio, never exceeding the source itself. A bound of
/// 0 is unconstrained on that axis.
///
/// Rounds half away from zero, keeps a 1 pixel minimum, and snaps a result
/// that rounding left one pixel shy of a constrained bound up to the bound.
pub fn constrain_dimensions(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if max_w == 0 && max_h == 0 {
        return (width, height);
    }

    let mut width_ratio = 1.0_f64;
    let mut height_ratio = 1.0_f64;
    let mut did_width = false;
    let mut did_height = false;

    if max_w > 0 && width > max_w {
        width_ratio = f64::from(max_w) / f64::from(width);
        did_width = true;
    }
    if max_h > 0 && height > max_h {
        height_ratio = f64::from(max_h) / f64::from(height);
        did_height = true;
    }

    let smaller_ratio = width_ratio.min(height_ratio);
    let larger_ratio = width_ratio.max(height_ratio);

    // Prefer the snugger ratio unless rounding pushes it past a bound.
    // An unbounded axis (max 0) always overflows here, which forces the
    // bounded axis to decide the ratio.
    let overflow = (f64::from(width) * larger_ratio).round() as u32 > max_w
        || (f64::from(height) * larger_ratio).round() as u32 > max_h;
    let ratio = if overflow { smaller_ratio } else { larger_ratio };

    // Very small sources can round to 0; 1 is the minimum.
    let mut w = ((f64::from(width) * ratio).round() as u32).max(1);
    let mut h = ((f64::from(height) * ratio).round() as u32).max(1);

    if did_width && w == max_w - 1 {
        w = max_w;
    }
    if did_height && h == max_h - 1 {
        h = max_h;
    }

    (w, h)
}

/// Ordered set of size profiles. Registration order is the matching order.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: Vec<SizeProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile. Re-registering a name replaces the existing
    /// entry without changing its position in the order.
    pub fn register(&mut self, profile: SizeProfile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(slot) => *slot = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> Option<&SizeProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SizeProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// First registered profile whose output for this source equals the
    /// requested dimensions exactly.
    pub fn match_request(
        &self,
        source_w: u32,
        source_h: u32,
        want_w: u32,
        want_h: u32,
    ) -> Option<&SizeProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.resize_result(source_w, source_h) == Some((want_w, want_h)))
    }
}
