//! Selecting the images that belong to the target application.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::capabilities::{ImageDescriptor, ModuleEnumerator};
use crate::error::Result;

/// Path prefixes of system libraries and jailbreak infrastructure.
pub const NON_APP_PREFIXES: &[&str] = &[
    // palera1n
    "/cores/binpack/",
    "/usr/lib/",
    "/System/",
    "/Library/MobileSubstrate/",
    "/Library/Frameworks/",
    "/electra/",
    "/chimera/",
    "/odyssey/",
    "/taurine/",
];

/// Returns true if `path` belongs to the system rather than an application.
pub fn is_system_path(path: &str) -> bool {
    NON_APP_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn parent_dir(path: &str) -> Option<PathBuf> {
    Path::new(path).parent().map(Path::to_path_buf)
}

/// Guesses the bundle directory of the application.
///
/// Prefers the path the process reports, then the directory of the first
/// non-system image, then the directory of the first image.
pub fn detect_bundle_root(
    modules: &[ImageDescriptor],
    main_bundle: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = main_bundle {
        debug!("Bundle path reported by process: {}", path.display());
        return Some(path.to_path_buf());
    }

    if let Some(main) = modules.iter().find(|m| !is_system_path(&m.path)) {
        info!("Found main module: {} at {}", main.name, main.path);
        return parent_dir(&main.path);
    }

    let first = modules.first()?;
    warn!(
        "All modules look like system modules; using {} as bundle",
        first.path
    );
    parent_dir(&first.path)
}

/// Returns the images located inside `bundle_root`, in load order.
pub fn application_images(modules: &[ImageDescriptor], bundle_root: &Path) -> Vec<ImageDescriptor> {
    modules
        .iter()
        .filter(|m| Path::new(&m.path).starts_with(bundle_root))
        .cloned()
        .collect()
}

/// Application images discovered in a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppImages {
    /// Bundle directory, if one could be determined
    pub bundle_root: Option<PathBuf>,
    /// Images inside the bundle
    pub images: Vec<ImageDescriptor>,
}

/// Enumerates loaded images and keeps the ones inside the application bundle.
pub fn discover(enumerator: &dyn ModuleEnumerator) -> Result<AppImages> {
    let modules = enumerator.list_all()?;
    let main_bundle = enumerator.main_bundle_path();
    let bundle_root = detect_bundle_root(&modules, main_bundle.as_deref());

    let images = match &bundle_root {
        Some(root) => application_images(&modules, root),
        None => Vec::new(),
    };
    info!("Found {} app modules", images.len());

    Ok(AppImages {
        bundle_root,
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(path: &str) -> ImageDescriptor {
        ImageDescriptor {
            name: crate::util::basename(path).to_string(),
            path: path.to_string(),
            base_address: 0x1_0000_0000,
            mapped_size: 0x4000,
        }
    }

    struct Listing {
        modules: Vec<ImageDescriptor>,
        bundle: Option<PathBuf>,
    }

    impl ModuleEnumerator for Listing {
        fn list_all(&self) -> Result<Vec<ImageDescriptor>> {
            Ok(self.modules.clone())
        }

        fn main_bundle_path(&self) -> Option<PathBuf> {
            self.bundle.clone()
        }
    }

    const APP: &str = "/var/containers/Bundle/Application/X/App.app/App";

    #[test]
    fn test_classification() {
        assert!(is_system_path("/System/Library/Foo"));
        assert!(is_system_path("/usr/lib/libobjc.A.dylib"));
        assert!(is_system_path("/cores/binpack/usr/lib/frida.dylib"));
        assert!(!is_system_path(APP));
        assert!(!is_system_path("/Applications/Settings.app/Settings"));
    }

    #[test]
    fn test_app_images_exclude_system() {
        let listing = Listing {
            modules: vec![image("/System/Library/Foo"), image(APP)],
            bundle: None,
        };
        let app = discover(&listing).unwrap();
        assert_eq!(
            app.bundle_root.as_deref(),
            Some(Path::new("/var/containers/Bundle/Application/X/App.app"))
        );
        assert_eq!(app.images.len(), 1);
        assert_eq!(app.images[0].path, APP);
    }

    #[test]
    fn test_frameworks_inside_bundle_are_included() {
        let fw = "/var/containers/Bundle/Application/X/App.app/Frameworks/Kit.framework/Kit";
        let modules = vec![
            image("/usr/lib/dyld"),
            image(APP),
            image("/usr/lib/libSystem.B.dylib"),
            image(fw),
            image("/var/containers/Bundle/Application/X/App.app2/Other"),
        ];
        let root = detect_bundle_root(&modules, None).unwrap();
        let images = application_images(&modules, &root);
        let paths: Vec<_> = images.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec![APP, fw]);
    }

    #[test]
    fn test_reported_bundle_path_wins() {
        let listing = Listing {
            modules: vec![image("/private/var/tmp/inject.dylib"), image(APP)],
            bundle: Some(PathBuf::from("/var/containers/Bundle/Application/X/App.app")),
        };
        let app = discover(&listing).unwrap();
        assert_eq!(app.images.len(), 1);
        assert_eq!(app.images[0].name, "App");
    }

    #[test]
    fn test_all_system_falls_back_to_first() {
        let modules = vec![image("/usr/lib/dyld"), image("/System/Library/Foo")];
        assert_eq!(
            detect_bundle_root(&modules, None),
            Some(PathBuf::from("/usr/lib"))
        );
        assert_eq!(detect_bundle_root(&[], None), None);
    }
}
