/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Image variants: one variant per partition image a module is installed
//! to.

use std::ops::Deref;

use dupe::Dupe;
use soong_core::config::BuildConfig;

use crate::context::BaseModuleContext;
use crate::context::BottomUpMutatorContext;
use crate::context::IncomingTransitionContext;
use crate::context::OutgoingTransitionContext;
use crate::module::ModuleBase;
use crate::module::Os;
use crate::mutator::RegisterMutatorsContext;
use crate::transition::VariationTransitionMutator;

pub const IMAGE_MUTATOR_NAME: &str = "image";

/// The system image. Also the variation of modules without image variants.
pub const CORE_VARIATION: &str = "";
pub const VENDOR_VARIATION: &str = "vendor";
pub const PRODUCT_VARIATION: &str = "product";
pub const RECOVERY_VARIATION: &str = "recovery";
pub const RAMDISK_VARIATION: &str = "ramdisk";
pub const VENDOR_RAMDISK_VARIATION: &str = "vendor_ramdisk";
pub const DEBUG_RAMDISK_VARIATION: &str = "debug_ramdisk";

/// The partition a module belongs to, from its partition properties.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, derive_more::Display)]
pub enum ModuleKind {
    #[display("platform")]
    Platform,
    #[display("device_specific")]
    DeviceSpecific,
    #[display("soc_specific")]
    SocSpecific,
    #[display("product_specific")]
    ProductSpecific,
    #[display("system_ext_specific")]
    SystemExtSpecific,
}

const CONFLICTING_VALUE: &str = "conflicting value set here";

/// The kind of `base`, with a property error for every conflicting flag.
pub fn module_kind(base: &ModuleBase) -> (ModuleKind, Vec<(&'static str, &'static str)>) {
    let props = &base.props;
    let soc_specific = base.soc_specific();
    let device_specific = props.device_specific;
    let product_specific = props.product_specific;
    let system_ext_specific = props.system_ext_specific;

    let mut errors = Vec::new();
    let soc_flags = [
        ("vendor", props.vendor),
        ("proprietary", props.proprietary),
        ("soc_specific", props.soc_specific),
    ];
    if soc_specific && device_specific {
        errors.push((
            "device_specific",
            "a module cannot be specific to SoC and device at the same time.",
        ));
        for (name, set) in soc_flags {
            if set {
                errors.push((name, CONFLICTING_VALUE));
            }
        }
    }
    if product_specific && system_ext_specific {
        errors.push((
            "product_specific",
            "a module cannot be specific to product and system_ext at the same time.",
        ));
        errors.push(("system_ext_specific", CONFLICTING_VALUE));
    }
    if (soc_specific || device_specific) && (product_specific || system_ext_specific) {
        if product_specific {
            errors.push((
                "product_specific",
                "a module cannot be specific to SoC or device and product at the same time.",
            ));
        } else {
            errors.push((
                "system_ext_specific",
                "a module cannot be specific to SoC or device and system_ext at the same time.",
            ));
        }
        if device_specific {
            errors.push(("device_specific", CONFLICTING_VALUE));
        } else {
            for (name, set) in soc_flags {
                if set {
                    errors.push((name, CONFLICTING_VALUE));
                }
            }
        }
    }

    let kind = if product_specific {
        ModuleKind::ProductSpecific
    } else if system_ext_specific {
        ModuleKind::SystemExtSpecific
    } else if device_specific {
        ModuleKind::DeviceSpecific
    } else if soc_specific {
        ModuleKind::SocSpecific
    } else {
        ModuleKind::Platform
    };
    (kind, errors)
}

/// Context handed to the [`ImageInterface`] predicates.
pub struct ImageInterfaceContext<'a> {
    base: BaseModuleContext<'a>,
    kind: ModuleKind,
}

impl<'a> ImageInterfaceContext<'a> {
    fn new(base: BaseModuleContext<'a>, kind: ModuleKind) -> ImageInterfaceContext<'a> {
        ImageInterfaceContext { base, kind }
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn platform(&self) -> bool {
        self.kind == ModuleKind::Platform
    }

    pub fn device_specific(&self) -> bool {
        self.kind == ModuleKind::DeviceSpecific
    }

    pub fn soc_specific(&self) -> bool {
        self.kind == ModuleKind::SocSpecific
    }

    pub fn product_specific(&self) -> bool {
        self.kind == ModuleKind::ProductSpecific
    }

    pub fn system_ext_specific(&self) -> bool {
        self.kind == ModuleKind::SystemExtSpecific
    }
}

impl<'a> Deref for ImageInterfaceContext<'a> {
    type Target = BaseModuleContext<'a>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Implemented by modules that are built differently per partition image.
///
/// Only Android modules are split; the predicates are independent of each
/// other.
pub trait ImageInterface: Send + Sync {
    /// Called before any predicate, from a mutator of its own.
    fn image_mutator_begin(&mut self, _kind: ModuleKind, _config: &BuildConfig) {}

    fn core_variant_needed(&self, ctx: &ImageInterfaceContext<'_>) -> bool;

    fn ramdisk_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        false
    }

    fn vendor_ramdisk_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        false
    }

    fn debug_ramdisk_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        false
    }

    fn recovery_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        false
    }

    fn vendor_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        false
    }

    fn product_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        false
    }

    /// Variations beyond the standard images, created after them.
    fn extra_image_variations(&self, _ctx: &ImageInterfaceContext<'_>) -> Vec<String> {
        Vec::new()
    }

    /// Called on every variant with its variation.
    fn set_image_variation(&mut self, _variation: &str) {}
}

/// The image variations of the visited module, in creation order.
fn image_variations(ctx: &ImageInterfaceContext<'_>) -> Vec<String> {
    let mut variations = Vec::new();
    if let Some(m) = ctx.module().as_image_interface() {
        if ctx.os() == Os::Android {
            let standard = [
                (m.core_variant_needed(ctx), CORE_VARIATION),
                (m.ramdisk_variant_needed(ctx), RAMDISK_VARIATION),
                (m.vendor_ramdisk_variant_needed(ctx), VENDOR_RAMDISK_VARIATION),
                (m.debug_ramdisk_variant_needed(ctx), DEBUG_RAMDISK_VARIATION),
                (m.recovery_variant_needed(ctx), RECOVERY_VARIATION),
                (m.vendor_variant_needed(ctx), VENDOR_VARIATION),
                (m.product_variant_needed(ctx), PRODUCT_VARIATION),
            ];
            variations.extend(
                standard
                    .into_iter()
                    .filter(|(needed, _)| *needed)
                    .map(|(_, v)| v.to_owned()),
            );
            variations.extend(m.extra_image_variations(ctx));
        }
    }
    if variations.is_empty() {
        variations.push(CORE_VARIATION.to_owned());
    }
    variations
}

fn image_begin_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    if ctx.module().base().os != Os::Android || ctx.module().as_image_interface().is_none() {
        return;
    }
    let (kind, _) = module_kind(ctx.module().base());
    let config = ctx.config();
    if let Some(m) = ctx.module_mut().as_image_interface_mut() {
        m.image_mutator_begin(kind, config);
    }
}

/// Splits modules by partition image.
pub struct ImageTransitionMutator;

impl VariationTransitionMutator for ImageTransitionMutator {
    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<String> {
        let (kind, errors) = module_kind(ctx.module().base());
        for (property, message) in errors {
            ctx.property_error(property, message);
        }
        image_variations(&ImageInterfaceContext::new(*ctx, kind))
    }

    fn outgoing_transition(&self, _ctx: &OutgoingTransitionContext<'_>, source: &str) -> String {
        source.to_owned()
    }

    fn incoming_transition(&self, ctx: &IncomingTransitionContext<'_>, incoming: &str) -> String {
        if ctx.os() != Os::Android || ctx.module().as_image_interface().is_none() {
            return CORE_VARIATION.to_owned();
        }
        let (kind, _) = module_kind(ctx.module().base());
        let mut variations = image_variations(&ImageInterfaceContext::new(**ctx, kind));
        // A module with a single variant gets every dependency, whatever was
        // asked for.
        if variations.len() == 1 {
            return variations.remove(0);
        }
        incoming.to_owned()
    }

    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, variation: &str) {
        ctx.module_mut().base_mut().set_image_variation(variation);
        if let Some(m) = ctx.module_mut().as_image_interface_mut() {
            m.set_image_variation(variation);
        }
    }
}

pub fn register_image_mutator(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("image_begin", image_begin_mutator).parallel();
    ctx.transition(IMAGE_MUTATOR_NAME, ImageTransitionMutator);
}

impl ModuleBase {
    pub fn in_recovery(&self) -> bool {
        self.image_variation() == RECOVERY_VARIATION
    }

    pub fn in_ramdisk(&self) -> bool {
        self.image_variation() == RAMDISK_VARIATION
    }

    pub fn in_vendor_ramdisk(&self) -> bool {
        self.image_variation() == VENDOR_RAMDISK_VARIATION
    }

    pub fn in_debug_ramdisk(&self) -> bool {
        self.image_variation() == DEBUG_RAMDISK_VARIATION
    }

    pub fn in_vendor(&self) -> bool {
        self.image_variation() == VENDOR_VARIATION
    }

    pub fn in_product(&self) -> bool {
        self.image_variation() == PRODUCT_VARIATION
    }
}
