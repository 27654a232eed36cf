pub mod segmented_toggle;
