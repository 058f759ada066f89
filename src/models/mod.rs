mod entity;
mod visitor;

pub use entity::{
    CreateExhibitRequest, CreateExhibitionRequest, CreateNewsRequest, EntityKind, Exhibit,
    Exhibition, News, SetPreviewRequest, UpdateExhibitRequest, UpdateExhibitionRequest,
    UpdateNewsRequest,
};
pub use visitor::{DailyVisitCount, NewVisit, VisitRequest, VisitStats, Visitor, VisitorFilter};
