use iced::{
    Element, Length, Theme, border,
    widget::{column, container, container::Style, container::bordered_box, row, text},
};

fn group_style(theme: &Theme) -> Style {
    bordered_box(theme).border(border::rounded(4).width(1))
}

fn status_bar_style(theme: &Theme) -> Style {
    let mut color_rgba = theme.palette().background.into_rgba8();
    color_rgba[0] /= 2;
    color_rgba[1] /= 2;
    color_rgba[2] /= 2;
    bordered_box(theme).background(iced::Color::from_rgb8(
        color_rgba[0],
        color_rgba[1],
        color_rgba[2],
    ))
}

/// Titled box of controls, e.g. "Model Setup"
pub fn group<'a, Message>(
    title: &'a str,
    content: impl Into<Element<'a, Message>>,
) -> Element<'a, Message>
where
    Message: 'a,
{
    container(column![text(title).size(16), content.into()].spacing(8))
        .style(group_style)
        .padding(10)
        .width(Length::Fill)
        .into()
}

/// Control panel on the left, display on the right, status bar below
pub fn layout<'a, Message>(
    control_panel: impl Into<Element<'a, Message>>,
    display_panel: impl Into<Element<'a, Message>>,
    status_bar: &'a str,
) -> Element<'a, Message>
where
    Message: 'a,
{
    column![
        row![
            container(control_panel.into())
                .width(Length::FillPortion(1))
                .height(Length::Fill)
                .padding(10),
            container(display_panel.into())
                .width(Length::FillPortion(3))
                .height(Length::Fill)
                .padding(10),
        ]
        .height(Length::Fill),
        container(text(status_bar).size(14))
            .style(status_bar_style)
            .padding(5)
            .width(Length::Fill),
    ]
    .into()
}
