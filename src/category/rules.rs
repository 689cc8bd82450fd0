use super::{CategoryRule, ClassificationResult};

pub const DEFAULT_ID: &str = "99";
pub const DEFAULT_NAME: &str = "Everything Else";

#[derive(Clone, Copy)]
struct CategoryDefinition {
    id: &'static str,
    name: &'static str,
    priority: i32,
    keywords: &'static [&'static str],
}

// Specificity lives in `priority`. Multi-word keywords sit above the generic
// "camera" catch-all so that position in this list never matters.
const CATEGORY_POOL: [CategoryDefinition; 13] = [
    CategoryDefinition {
        id: "625",
        name: "Cameras & Photo",
        priority: 10,
        keywords: &["camera", "photo"],
    },
    CategoryDefinition {
        id: "31388",
        name: "Digital Cameras",
        priority: 90,
        keywords: &["digital camera", "mirrorless", "dslr"],
    },
    CategoryDefinition {
        id: "31388",
        name: "Point & Shoot Digital Cameras",
        priority: 100,
        keywords: &["point & shoot", "point and shoot", "compact camera"],
    },
    CategoryDefinition {
        id: "15230",
        name: "Film Cameras",
        priority: 95,
        keywords: &["film camera", "35mm", "rangefinder", "instant camera"],
    },
    CategoryDefinition {
        id: "11724",
        name: "Camcorders",
        priority: 95,
        keywords: &["camcorder", "video camera"],
    },
    CategoryDefinition {
        id: "179697",
        name: "Camera Drones",
        priority: 100,
        keywords: &["drone", "quadcopter"],
    },
    CategoryDefinition {
        id: "3323",
        name: "Lenses",
        priority: 80,
        keywords: &["lens"],
    },
    CategoryDefinition {
        id: "29994",
        name: "Lens Filters",
        priority: 85,
        keywords: &["filter"],
    },
    CategoryDefinition {
        id: "64353",
        name: "Flashes & Flash Accessories",
        priority: 70,
        keywords: &["flash", "speedlight", "speedlite"],
    },
    CategoryDefinition {
        id: "30090",
        name: "Tripods & Supports",
        priority: 70,
        keywords: &["tripod", "monopod", "gimbal"],
    },
    CategoryDefinition {
        id: "16031",
        name: "Camera Bags, Cases & Straps",
        priority: 85,
        keywords: &["camera bag", "camera case", "strap", "backpack"],
    },
    CategoryDefinition {
        id: "48446",
        name: "Camera Batteries & Chargers",
        priority: 75,
        keywords: &["battery", "batteries", "charger"],
    },
    CategoryDefinition {
        id: "28179",
        name: "Binoculars & Telescopes",
        priority: 60,
        keywords: &["binocular", "telescope", "monocular"],
    },
];

pub fn builtin_rules() -> Vec<CategoryRule> {
    CATEGORY_POOL
        .iter()
        .map(|def| CategoryRule {
            category_id: def.id.to_string(),
            name: def.name.to_string(),
            keywords: def.keywords.iter().map(|k| k.to_string()).collect(),
            priority: def.priority,
        })
        .collect()
}

pub fn builtin_default() -> ClassificationResult {
    ClassificationResult {
        id: DEFAULT_ID.to_string(),
        name: DEFAULT_NAME.to_string(),
    }
}
