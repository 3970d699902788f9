//! Reply text assembled from a spun base, one spun detail and a call to action.

use rand::seq::IndexedRandom;
use rand::Rng;
use replyscout_core::ReplyTemplate;

use crate::spin::spin_with;

/// `spin(base) spin(random detail) random cta`, single-space separated.
pub fn compose(template: &ReplyTemplate) -> String {
    compose_with(template, &mut rand::rng())
}

pub fn compose_with<R: Rng + ?Sized>(template: &ReplyTemplate, rng: &mut R) -> String {
    let base = spin_with(&template.base, rng);
    let detail = template
        .details
        .choose(rng)
        .map(|d| spin_with(d, rng))
        .unwrap_or_default();
    let cta = template.cta_options.choose(rng).cloned().unwrap_or_default();
    format!("{base} {detail} {cta}")
}
