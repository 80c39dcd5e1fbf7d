//! Immutable set of known identities for one monitoring session.

use crate::types::{Identity, IdentityId};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GalleryError {
    #[error("gallery is empty; enroll at least one identity before monitoring")]
    Empty,
    #[error("identity {0} has no reference embeddings")]
    NoReferences(IdentityId),
    #[error("identity {0} appears more than once")]
    DuplicateIdentity(IdentityId),
    #[error("identity {identity}: expected {expected}-dim embeddings, got {actual}")]
    DimensionMismatch {
        identity: IdentityId,
        expected: usize,
        actual: usize,
    },
}

/// Known identities in registration order.
///
/// The order is significant: the matcher breaks exact distance ties in
/// favour of the identity that appears first.
#[derive(Debug, Clone)]
pub struct Gallery {
    identities: Vec<Identity>,
    dim: usize,
}

impl Gallery {
    /// Build a gallery, refusing empty input and inconsistent dimensionality.
    pub fn new(identities: Vec<Identity>) -> Result<Self, GalleryError> {
        let first = identities.first().ok_or(GalleryError::Empty)?;
        let dim = first
            .references
            .first()
            .ok_or_else(|| GalleryError::NoReferences(first.id.clone()))?
            .dim();

        let mut seen = HashSet::new();
        for identity in &identities {
            if !seen.insert(identity.id.clone()) {
                return Err(GalleryError::DuplicateIdentity(identity.id.clone()));
            }
            if identity.references.is_empty() {
                return Err(GalleryError::NoReferences(identity.id.clone()));
            }
            if let Some(bad) = identity.references.iter().find(|r| r.dim() != dim) {
                return Err(GalleryError::DimensionMismatch {
                    identity: identity.id.clone(),
                    expected: dim,
                    actual: bad.dim(),
                });
            }
        }

        let reference_count: usize = identities.iter().map(|i| i.references.len()).sum();
        tracing::info!(
            identities = identities.len(),
            references = reference_count,
            dim,
            "gallery loaded"
        );

        Ok(Self { identities, dim })
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, id: &IdentityId) -> Option<&Identity> {
        self.identities.iter().find(|i| &i.id == id)
    }

    /// Embedding dimensionality shared by every reference.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    fn identity(id: &str, refs: Vec<Vec<f32>>) -> Identity {
        Identity {
            id: id.into(),
            name: id.to_uppercase(),
            employee_id: None,
            references: refs.into_iter().map(Embedding::new).collect(),
        }
    }

    #[test]
    fn test_gallery_rejects_empty() {
        assert_eq!(Gallery::new(vec![]).unwrap_err(), GalleryError::Empty);
    }

    #[test]
    fn test_gallery_rejects_identity_without_references() {
        let err = Gallery::new(vec![identity("a", vec![vec![1.0]]), identity("b", vec![])])
            .unwrap_err();
        assert_eq!(err, GalleryError::NoReferences("b".into()));
    }

    #[test]
    fn test_gallery_rejects_mixed_dimensions() {
        let err = Gallery::new(vec![
            identity("a", vec![vec![1.0, 0.0]]),
            identity("b", vec![vec![1.0, 0.0, 0.0]]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch { expected: 2, actual: 3, .. }
        ));
    }

    #[test]
    fn test_gallery_rejects_duplicates() {
        let err = Gallery::new(vec![
            identity("a", vec![vec![1.0]]),
            identity("a", vec![vec![0.5]]),
        ])
        .unwrap_err();
        assert_eq!(err, GalleryError::DuplicateIdentity("a".into()));
    }

    #[test]
    fn test_gallery_lookup() {
        let gallery = Gallery::new(vec![
            identity("a", vec![vec![1.0, 0.0]]),
            identity("b", vec![vec![0.0, 1.0], vec![0.1, 0.9]]),
        ])
        .unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.dim(), 2);
        assert_eq!(gallery.get(&"b".into()).unwrap().name, "B");
        assert!(gallery.get(&"c".into()).is_none());
    }
}
