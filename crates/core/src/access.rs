/// The staff capability of the current caller, decided by the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    staff: bool,
}

impl Caller {
    pub fn staff() -> Self {
        Self { staff: true }
    }

    pub fn participant() -> Self {
        Self { staff: false }
    }

    pub fn from_capability(is_staff: bool) -> Self {
        Self { staff: is_staff }
    }

    pub fn is_staff(&self) -> bool {
        self.staff
    }

    /// Reject non-staff callers before any state is touched.
    pub fn require_staff(&self) -> Result<(), AccessError> {
        if self.staff {
            Ok(())
        } else {
            Err(AccessError::StaffOnly)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Unauthorized (staff only)")]
    StaffOnly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staff_passes() {
        assert!(Caller::staff().require_staff().is_ok());
        assert_eq!(
            Caller::participant().require_staff(),
            Err(AccessError::StaffOnly)
        );
        assert_eq!(
            AccessError::StaffOnly.to_string(),
            "Unauthorized (staff only)"
        );
    }
}
