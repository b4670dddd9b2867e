use std::{collections::HashMap, path::Path};

use crate::{
    LabeledImage,
    error::{ForensicsError, Result},
};

#[derive(Debug, Clone)]
pub struct ImagePair {
    pub pre: LabeledImage,
    pub post: LabeledImage,
}

/// Decides which "post" image each "pre" image is compared against.
pub trait PairingStrategy: Send + Sync {
    fn pair(&self, pre: Vec<LabeledImage>, post: Vec<LabeledImage>) -> Result<Vec<ImagePair>>;

    fn name(&self) -> &str;
}

/// Zips two sequences position by position.
pub fn align(pre: Vec<LabeledImage>, post: Vec<LabeledImage>) -> Result<Vec<ImagePair>> {
    if pre.len() != post.len() {
        return Err(ForensicsError::BatchAlignment {
            pre: pre.len(),
            post: post.len(),
        });
    }

    Ok(pre
        .into_iter()
        .zip(post)
        .map(|(pre, post)| ImagePair { pre, post })
        .collect())
}

/// Sorts both listings by label and pairs images of equal rank. File names
/// are not compared.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortOrderPairing;

impl PairingStrategy for SortOrderPairing {
    fn pair(
        &self,
        mut pre: Vec<LabeledImage>,
        mut post: Vec<LabeledImage>,
    ) -> Result<Vec<ImagePair>> {
        pre.sort_by(|a, b| a.label.cmp(&b.label));
        post.sort_by(|a, b| a.label.cmp(&b.label));
        align(pre, post)
    }

    fn name(&self) -> &str {
        "sort-order"
    }
}

/// Pairs images whose labels end in the same file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamePairing;

fn file_name(label: &str) -> &str {
    Path::new(label)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(label)
}

impl PairingStrategy for NamePairing {
    fn pair(&self, pre: Vec<LabeledImage>, post: Vec<LabeledImage>) -> Result<Vec<ImagePair>> {
        if pre.len() != post.len() {
            return Err(ForensicsError::BatchAlignment {
                pre: pre.len(),
                post: post.len(),
            });
        }

        let mut by_name = HashMap::with_capacity(post.len());
        for image in post {
            let name = file_name(&image.label).to_string();
            if by_name.insert(name.clone(), image).is_some() {
                return Err(ForensicsError::InvalidParameter(format!(
                    "duplicate post image name {name}"
                )));
            }
        }

        let mut pairs = Vec::with_capacity(pre.len());
        for image in pre {
            let post = by_name.remove(file_name(&image.label)).ok_or_else(|| {
                ForensicsError::InvalidParameter(format!(
                    "no post image named {}",
                    file_name(&image.label)
                ))
            })?;
            pairs.push(ImagePair { pre: image, post });
        }

        Ok(pairs)
    }

    fn name(&self) -> &str {
        "name"
    }
}
